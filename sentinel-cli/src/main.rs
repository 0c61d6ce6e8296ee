//! Demo harness: drives `sentinel_core::Orchestrator` from a recorded NDJSON
//! event fixture, using an in-memory hot store and a SQLite cold store.
//! There is no network surface here — the HTTP layer that would normally
//! front the orchestrator is an external collaborator (spec.md §1).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use sentinel_core::clock::{Millis, SystemClock};
use sentinel_core::config::SentinelConfig;
use sentinel_core::detectors::navigator::RequestContext;
use sentinel_core::model::event::{KeyboardBatch, MouseBatch};
use sentinel_core::orchestrator::{EvaluateRequest, Orchestrator};
use sentinel_core::store::{InMemoryHotStore, SqliteColdStore};

#[derive(Parser)]
#[command(author, version, about = "Replay a recorded session against the Sentinel orchestrator", long_about = None)]
struct Cli {
    /// Path to an NDJSON fixture of tagged events (see `demos/` for samples).
    fixture: PathBuf,

    /// Path to the SQLite cold store. Defaults to an in-memory database.
    #[arg(long)]
    cold_store: Option<PathBuf>,

    /// Config file (TOML). Defaults to built-in values.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum FixtureLine {
    Keyboard(KeyboardBatch),
    Mouse(MouseBatch),
    Evaluate {
        session_id: String,
        eval_id: String,
        request_context: RequestContext,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SentinelConfig::load(path).context("failed to load config")?,
        None => SentinelConfig::default(),
    };

    let hot = Arc::new(InMemoryHotStore::new());
    let cold: Arc<dyn sentinel_core::ColdStore> = match &cli.cold_store {
        Some(path) => Arc::new(SqliteColdStore::open(path).context("failed to open cold store")?),
        None => Arc::new(SqliteColdStore::open_in_memory().context("failed to open in-memory cold store")?),
    };
    let clock = Arc::new(SystemClock);

    let orchestrator = Orchestrator::new(hot, cold, clock, config);

    let file = File::open(&cli.fixture).with_context(|| format!("failed to open fixture {:?}", cli.fixture))?;
    let reader = BufReader::new(file);

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: FixtureLine = serde_json::from_str(&line)
            .with_context(|| format!("fixture line {} is not a valid event", lineno + 1))?;

        match event {
            FixtureLine::Keyboard(batch) => {
                orchestrator.ingest_keyboard(&batch)?;
                println!("[{}] keyboard batch {} ingested ({} events)", batch.session_id, batch.batch_id, batch.events.len());
            }
            FixtureLine::Mouse(batch) => {
                orchestrator.ingest_mouse(&batch)?;
                println!("[{}] mouse batch {} ingested ({} events)", batch.session_id, batch.batch_id, batch.events.len());
            }
            FixtureLine::Evaluate {
                session_id,
                eval_id,
                request_context,
            } => {
                let req = EvaluateRequest {
                    session_id: session_id.clone(),
                    eval_id,
                    request_context,
                    business_context: None,
                    role: None,
                    mfa_status: None,
                    session_start_time: None::<Millis>,
                    client_fingerprint: None,
                };
                let resp = orchestrator.evaluate(&req)?;
                println!(
                    "[{}] decision={:?} risk={:.3} mode={:?} ban_expires_in={:?}",
                    session_id, resp.decision, resp.risk, resp.mode, resp.ban_expires_in_seconds
                );
            }
        }
    }

    Ok(())
}
