//! Cold-state model + audit store (spec.md §3 "UserModel", §4.8 "Learning
//! & persistence", §6 tables `user_behavior_models` / `audit_logs`).
//!
//! Backed by `rusqlite` the same way the rest of this corpus reaches for
//! SQLite: one file, WAL journaling, a `Mutex<Connection>` since
//! `rusqlite::Connection` isn't `Sync`. Model blobs are stored base64-text
//! rather than `BLOB` so a DB browsed by hand stays legible, per spec.md's
//! "Blob encoding contract" — the trade is that a truncated write can leave
//! a base64 string whose length isn't a multiple of 4, which `load` treats
//! as corruption and heals by discarding the row.

use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rusqlite::{params, Connection};
use thiserror::Error;

use crate::model::user_model::{ModelType, UserModel};

#[derive(Debug, Error)]
pub enum ColdStoreError {
    #[error("cold store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
    #[error("cold store call exceeded timeout")]
    Timeout,
    #[error("stored model blob failed its base64 integrity check")]
    BlobIntegrity,
    #[error("save lost an optimistic concurrency race (version mismatch)")]
    VersionConflict,
    #[error("cold store connection mutex was poisoned by a panicking holder")]
    Poisoned,
}

pub trait ColdStore: Send + Sync {
    fn load(&self, user_id: &str, model_type: ModelType) -> Result<Option<UserModel>, ColdStoreError>;

    /// Writes `model` only if the row's current version equals
    /// `expected_version` (0 meaning "no row yet"). On success the row's
    /// version becomes `expected_version + 1`.
    fn save(&self, model: &UserModel, expected_version: i64) -> Result<(), ColdStoreError>;

    fn append_audit(
        &self,
        eval_id: &str,
        session_id: &str,
        user_id: &str,
        ts_ms: i64,
        payload_json: &str,
    ) -> Result<(), ColdStoreError>;

    /// Looks up a previously-written audit record's payload by `eval_id`
    /// (spec.md §4.11: "`eval_id` is idempotent — a duplicate is recognized
    /// and the prior decision is returned unchanged").
    fn find_audit(&self, eval_id: &str) -> Result<Option<String>, ColdStoreError>;

    /// Load-mutate-save with up to `max_retries` retries on a lost
    /// version race (spec.md §4.8's "per-user learning lock" guards
    /// against *concurrent* learning passes; this loop is what makes a
    /// single pass resilient to the rare races that slip through anyway,
    /// e.g. a model row touched by a direct admin write).
    fn learn_with_retry(
        &self,
        user_id: &str,
        model_type: ModelType,
        max_retries: u32,
        f: &mut dyn FnMut(Option<UserModel>) -> UserModel,
    ) -> Result<UserModel, ColdStoreError> {
        for _ in 0..=max_retries {
            let current = self.load(user_id, model_type)?;
            let expected_version = current.as_ref().map(|m| m.version).unwrap_or(0);
            let new_model = f(current);
            match self.save(&new_model, expected_version) {
                Ok(()) => return Ok(new_model),
                Err(ColdStoreError::VersionConflict) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(ColdStoreError::VersionConflict)
    }
}

pub struct SqliteColdStore {
    conn: Mutex<Connection>,
}

impl SqliteColdStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, ColdStoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;
             CREATE TABLE IF NOT EXISTS user_behavior_models (
                 user_id               TEXT NOT NULL,
                 model_type            TEXT NOT NULL,
                 model_blob_base64     TEXT NOT NULL,
                 feature_window_count  INTEGER NOT NULL DEFAULT 0,
                 version               INTEGER NOT NULL DEFAULT 0,
                 updated_at            INTEGER NOT NULL,
                 PRIMARY KEY (user_id, model_type)
             );
             CREATE TABLE IF NOT EXISTS audit_logs (
                 eval_id       TEXT PRIMARY KEY,
                 session_id    TEXT NOT NULL,
                 user_id       TEXT NOT NULL,
                 ts            INTEGER NOT NULL,
                 payload_json  TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_audit_logs_user ON audit_logs(user_id, ts);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, ColdStoreError> {
        Self::open(":memory:")
    }
}

impl ColdStore for SqliteColdStore {
    fn load(&self, user_id: &str, model_type: ModelType) -> Result<Option<UserModel>, ColdStoreError> {
        let row = {
            let conn = self.conn.lock().map_err(|_| ColdStoreError::Poisoned)?;
            conn.query_row(
                "SELECT model_blob_base64, feature_window_count, version, updated_at
                 FROM user_behavior_models WHERE user_id = ?1 AND model_type = ?2",
                params![user_id, model_type.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| if e == rusqlite::Error::QueryReturnedNoRows { Ok(None) } else { Err(e) })?
        };

        let Some((encoded, feature_window_count, version, updated_at)) = row else {
            return Ok(None);
        };

        let delete_row = || -> Result<(), ColdStoreError> {
            let conn = self.conn.lock().map_err(|_| ColdStoreError::Poisoned)?;
            conn.execute(
                "DELETE FROM user_behavior_models WHERE user_id = ?1 AND model_type = ?2",
                params![user_id, model_type.as_str()],
            )?;
            Ok(())
        };

        if encoded.len() % 4 != 0 {
            log::warn!(
                "cold store: corrupt base64 blob for user={} model_type={}, deleting row",
                user_id,
                model_type.as_str()
            );
            delete_row()?;
            return Ok(None);
        }

        let model_blob = match BASE64.decode(&encoded) {
            Ok(bytes) => bytes,
            Err(_) => {
                log::warn!(
                    "cold store: undecodable base64 blob for user={} model_type={}, deleting row",
                    user_id,
                    model_type.as_str()
                );
                delete_row()?;
                return Ok(None);
            }
        };

        Ok(Some(UserModel {
            user_id: user_id.to_string(),
            model_type,
            model_blob,
            feature_window_count,
            version,
            updated_at,
        }))
    }

    fn save(&self, model: &UserModel, expected_version: i64) -> Result<(), ColdStoreError> {
        let encoded = BASE64.encode(&model.model_blob);
        if encoded.len() % 4 != 0 {
            log::error!(
                "cold store refusing to persist malformed base64 blob for user={} model_type={}",
                model.user_id,
                model.model_type.as_str()
            );
            return Err(ColdStoreError::BlobIntegrity);
        }

        let conn = self.conn.lock().map_err(|_| ColdStoreError::Poisoned)?;
        let new_version = expected_version + 1;
        let rows_affected = if expected_version == 0 {
            conn.execute(
                "INSERT OR IGNORE INTO user_behavior_models
                 (user_id, model_type, model_blob_base64, feature_window_count, version, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    model.user_id,
                    model.model_type.as_str(),
                    encoded,
                    model.feature_window_count,
                    new_version,
                    model.updated_at,
                ],
            )?
        } else {
            conn.execute(
                "UPDATE user_behavior_models
                 SET model_blob_base64 = ?1, feature_window_count = ?2, version = ?3, updated_at = ?4
                 WHERE user_id = ?5 AND model_type = ?6 AND version = ?7",
                params![
                    encoded,
                    model.feature_window_count,
                    new_version,
                    model.updated_at,
                    model.user_id,
                    model.model_type.as_str(),
                    expected_version,
                ],
            )?
        };

        if rows_affected == 0 {
            return Err(ColdStoreError::VersionConflict);
        }
        Ok(())
    }

    fn append_audit(
        &self,
        eval_id: &str,
        session_id: &str,
        user_id: &str,
        ts_ms: i64,
        payload_json: &str,
    ) -> Result<(), ColdStoreError> {
        let conn = self.conn.lock().map_err(|_| ColdStoreError::Poisoned)?;
        conn.execute(
            "INSERT OR IGNORE INTO audit_logs (eval_id, session_id, user_id, ts, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![eval_id, session_id, user_id, ts_ms, payload_json],
        )?;
        Ok(())
    }

    fn find_audit(&self, eval_id: &str) -> Result<Option<String>, ColdStoreError> {
        let conn = self.conn.lock().map_err(|_| ColdStoreError::Poisoned)?;
        conn.query_row(
            "SELECT payload_json FROM audit_logs WHERE eval_id = ?1",
            params![eval_id],
            |row| row.get::<_, String>(0),
        )
        .map(Some)
        .or_else(|e| if e == rusqlite::Error::QueryReturnedNoRows { Ok(None) } else { Err(e.into()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model(version: i64) -> UserModel {
        UserModel {
            user_id: "alice".into(),
            model_type: ModelType::KeyboardHst,
            model_blob: vec![1, 2, 3, 4, 5],
            feature_window_count: 10,
            version,
            updated_at: 1_000,
        }
    }

    #[test]
    fn round_trips_a_model() {
        let store = SqliteColdStore::open_in_memory().unwrap();
        assert!(store.load("alice", ModelType::KeyboardHst).unwrap().is_none());

        store.save(&sample_model(0), 0).unwrap();
        let loaded = store.load("alice", ModelType::KeyboardHst).unwrap().unwrap();
        assert_eq!(loaded.model_blob, vec![1, 2, 3, 4, 5]);
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn save_with_stale_version_conflicts() {
        let store = SqliteColdStore::open_in_memory().unwrap();
        store.save(&sample_model(0), 0).unwrap();
        let err = store.save(&sample_model(0), 0).unwrap_err();
        assert!(matches!(err, ColdStoreError::VersionConflict));
    }

    #[test]
    fn learn_with_retry_converges_under_a_concurrent_writer() {
        let store = SqliteColdStore::open_in_memory().unwrap();
        store.save(&sample_model(0), 0).unwrap();

        // Simulate another writer landing between our load and save by
        // bumping the version out from under the first attempt.
        let mut attempts = 0;
        let result = store
            .learn_with_retry("alice", ModelType::KeyboardHst, 3, &mut |current| {
                attempts += 1;
                let mut model = current.unwrap();
                if attempts == 1 {
                    // racer commits its own write first
                    let mut racer = sample_model(model.version);
                    racer.feature_window_count = 999;
                    store.save(&racer, model.version).unwrap();
                }
                model.feature_window_count += 1;
                model
            })
            .unwrap();
        assert!(attempts >= 2, "expected a retry after the injected race");
        assert_eq!(result.feature_window_count, 1000);
    }

    #[test]
    fn corrupt_blob_heals_by_deleting_the_row() {
        let store = SqliteColdStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO user_behavior_models
                 (user_id, model_type, model_blob_base64, feature_window_count, version, updated_at)
                 VALUES ('bob', 'keyboard_hst', 'abc', 1, 1, 0)",
                [],
            )
            .unwrap();
        }
        assert!(store.load("bob", ModelType::KeyboardHst).unwrap().is_none());
        // healed: the row is gone, not just unreadable.
        {
            let conn = store.conn.lock().unwrap();
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM user_behavior_models WHERE user_id = 'bob'", [], |r| r.get(0))
                .unwrap();
            assert_eq!(count, 0);
        }
    }

    #[test]
    fn audit_append_is_idempotent_on_eval_id() {
        let store = SqliteColdStore::open_in_memory().unwrap();
        store.append_audit("ev1", "s1", "alice", 1_000, "{}").unwrap();
        store.append_audit("ev1", "s1", "alice", 1_000, "{}").unwrap();
        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM audit_logs WHERE eval_id = 'ev1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn find_audit_returns_the_stored_payload() {
        let store = SqliteColdStore::open_in_memory().unwrap();
        assert!(store.find_audit("ev1").unwrap().is_none());
        store.append_audit("ev1", "s1", "alice", 1_000, "{\"decision\":\"ALLOW\"}").unwrap();
        assert_eq!(store.find_audit("ev1").unwrap().unwrap(), "{\"decision\":\"ALLOW\"}");
    }
}
