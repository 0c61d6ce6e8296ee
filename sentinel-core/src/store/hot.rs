//! Hot-state session store (spec.md §2, §4.10 steps 1-2 and 9).
//!
//! Modeled on a single Redis-style key space: per-session state under
//! optimistic WATCH/MULTI/EXEC concurrency control, plus two small
//! per-user side tables for bans and strike counters. The in-memory
//! `DashMap` backend below is a faithful reference implementation of that
//! contract — a real deployment would swap it for an actual Redis client
//! behind the same trait without touching the orchestrator.

use std::collections::HashMap;
use std::sync::Mutex;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::clock::Millis;
use crate::model::session::SessionState;

#[derive(Debug, Error)]
pub enum HotStoreError {
    #[error("hot store unavailable")]
    Unavailable,
    #[error("hot store call exceeded timeout")]
    Timeout,
    #[error("update_transactional exhausted its retry budget without committing")]
    ConflictExhausted,
}

/// Provisional ban record (spec.md §3 "Ban"). Sentinel only ever writes
/// the short provisional TTL; the longer Auditor-assigned tiers in the
/// spec's Ban table are written by a different, out-of-scope pipeline and
/// never appear here.
#[derive(Debug, Clone)]
pub struct Ban {
    pub reason: String,
    pub expires_at_ms: Millis,
}

pub trait HotStore: Send + Sync {
    /// Read the live session, or `None` if absent or past its TTL.
    fn get(&self, session_id: &str, now_ms: Millis) -> Result<Option<SessionState>, HotStoreError>;

    /// Read-modify-write a session under optimistic concurrency control.
    /// `f` receives the current state (`None` if this is the session's
    /// first write) and returns the state to commit. On a WATCH conflict
    /// (another writer committed between our read and our write) `f` is
    /// re-invoked against the fresher state, up to `max_retries` times.
    fn update_transactional(
        &self,
        session_id: &str,
        now_ms: Millis,
        max_retries: u32,
        f: &mut dyn FnMut(Option<SessionState>) -> SessionState,
    ) -> Result<SessionState, HotStoreError>;

    fn get_ban(&self, user_id: &str, now_ms: Millis) -> Result<Option<Ban>, HotStoreError>;
    fn set_ban(&self, user_id: &str, reason: String, ttl_secs: u64, now_ms: Millis) -> Result<(), HotStoreError>;
    fn clear_ban(&self, user_id: &str) -> Result<(), HotStoreError>;

    /// Increment the user's global strike counter (refreshing its TTL) and
    /// return the post-increment count.
    fn incr_strike(&self, user_id: &str, ttl_days: u32, now_ms: Millis) -> Result<u32, HotStoreError>;
    fn get_strikes(&self, user_id: &str, now_ms: Millis) -> Result<u32, HotStoreError>;
}

struct StrikeEntry {
    count: u32,
    expires_at_ms: Millis,
}

/// Reference `HotStore` backed by `DashMap`. Versioning is the
/// WATCH/MULTI/EXEC emulation: `update_transactional` reads a
/// `(SessionState, version)` pair without holding a lock, computes the new
/// state, then commits only if the version hasn't moved underneath it —
/// the same observable contract a real Redis `WATCH` gives you, minus the
/// network round trip.
pub struct InMemoryHotStore {
    sessions: DashMap<String, (SessionState, u64)>,
    bans: DashMap<String, Ban>,
    strikes: DashMap<String, StrikeEntry>,
    // DashMap shards internally; this just keeps ban/strike bookkeeping
    // single-threaded-simple without fighting shard locks for compound ops.
    side_table_lock: Mutex<()>,
}

impl InMemoryHotStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            bans: DashMap::new(),
            strikes: DashMap::new(),
            side_table_lock: Mutex::new(()),
        }
    }

    fn read_live(&self, session_id: &str, now_ms: Millis) -> (Option<SessionState>, u64) {
        match self.sessions.get(session_id) {
            Some(entry) => {
                let (state, version) = entry.value().clone();
                if state.is_expired(now_ms) {
                    (None, version)
                } else {
                    (Some(state), version)
                }
            }
            None => (None, 0),
        }
    }
}

impl Default for InMemoryHotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HotStore for InMemoryHotStore {
    fn get(&self, session_id: &str, now_ms: Millis) -> Result<Option<SessionState>, HotStoreError> {
        Ok(self.read_live(session_id, now_ms).0)
    }

    fn update_transactional(
        &self,
        session_id: &str,
        now_ms: Millis,
        max_retries: u32,
        f: &mut dyn FnMut(Option<SessionState>) -> SessionState,
    ) -> Result<SessionState, HotStoreError> {
        for _ in 0..=max_retries {
            let (current, seen_version) = self.read_live(session_id, now_ms);
            let new_state = f(current);

            let committed = match self.sessions.entry(session_id.to_string()) {
                Entry::Occupied(mut occ) => {
                    if occ.get().1 == seen_version {
                        occ.insert((new_state.clone(), seen_version + 1));
                        true
                    } else {
                        false
                    }
                }
                Entry::Vacant(vac) => {
                    if seen_version == 0 {
                        vac.insert((new_state.clone(), 1));
                        true
                    } else {
                        false
                    }
                }
            };

            if committed {
                return Ok(new_state);
            }
        }
        Err(HotStoreError::ConflictExhausted)
    }

    fn get_ban(&self, user_id: &str, now_ms: Millis) -> Result<Option<Ban>, HotStoreError> {
        let _guard = self.side_table_lock.lock().map_err(|_| HotStoreError::Unavailable)?;
        match self.bans.get(user_id) {
            Some(ban) if ban.expires_at_ms > now_ms => Ok(Some(ban.clone())),
            Some(_) => {
                self.bans.remove(user_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set_ban(&self, user_id: &str, reason: String, ttl_secs: u64, now_ms: Millis) -> Result<(), HotStoreError> {
        self.bans.insert(
            user_id.to_string(),
            Ban {
                reason,
                expires_at_ms: now_ms + (ttl_secs as i64) * 1000,
            },
        );
        Ok(())
    }

    fn clear_ban(&self, user_id: &str) -> Result<(), HotStoreError> {
        self.bans.remove(user_id);
        Ok(())
    }

    fn incr_strike(&self, user_id: &str, ttl_days: u32, now_ms: Millis) -> Result<u32, HotStoreError> {
        let _guard = self.side_table_lock.lock().map_err(|_| HotStoreError::Unavailable)?;
        let ttl_ms = (ttl_days as i64) * 86_400_000;
        let mut entry = self.strikes.entry(user_id.to_string()).or_insert(StrikeEntry {
            count: 0,
            expires_at_ms: now_ms + ttl_ms,
        });
        if entry.expires_at_ms <= now_ms {
            entry.count = 0;
        }
        entry.count += 1;
        entry.expires_at_ms = now_ms + ttl_ms;
        Ok(entry.count)
    }

    fn get_strikes(&self, user_id: &str, now_ms: Millis) -> Result<u32, HotStoreError> {
        match self.strikes.get(user_id) {
            Some(entry) if entry.expires_at_ms > now_ms => Ok(entry.count),
            _ => Ok(0),
        }
    }
}

/// Snapshot helper for tests that want to compare session counts without
/// pulling in the whole orchestrator.
#[cfg(test)]
pub(crate) fn session_count(store: &InMemoryHotStore) -> usize {
    store.sessions.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::session::SessionState;

    #[test]
    fn get_on_missing_session_is_none() {
        let store = InMemoryHotStore::new();
        assert!(store.get("s1", 1_000).unwrap().is_none());
    }

    #[test]
    fn update_transactional_creates_then_updates() {
        let store = InMemoryHotStore::new();
        let s1 = store
            .update_transactional("s1", 1_000, 5, &mut |cur| {
                assert!(cur.is_none());
                SessionState::new("s1".into(), "alice".into(), 1_000)
            })
            .unwrap();
        assert_eq!(s1.trust_score, 0.5);

        let s2 = store
            .update_transactional("s1", 1_001, 5, &mut |cur| {
                let mut state = cur.expect("session exists");
                state.trust_score = 0.9;
                state
            })
            .unwrap();
        assert_eq!(s2.trust_score, 0.9);
        assert_eq!(session_count(&store), 1);
    }

    #[test]
    fn expired_session_reads_as_absent_and_reinitializes() {
        let store = InMemoryHotStore::new();
        store
            .update_transactional("s1", 0, 5, &mut |_| SessionState::new("s1".into(), "alice".into(), 0))
            .unwrap();

        let far_future = (crate::model::session::SESSION_TTL_SECS as i64 + 10) * 1000;
        assert!(store.get("s1", far_future).unwrap().is_none());

        let fresh = store
            .update_transactional("s1", far_future, 5, &mut |cur| {
                assert!(cur.is_none(), "expired session must read as absent");
                SessionState::new("s1".into(), "alice".into(), far_future)
            })
            .unwrap();
        assert_eq!(fresh.last_activity, far_future);
    }

    #[test]
    fn ban_lifecycle() {
        let store = InMemoryHotStore::new();
        assert!(store.get_ban("bob", 0).unwrap().is_none());
        store.set_ban("bob", "physics_hard_fail".into(), 300, 0).unwrap();
        let ban = store.get_ban("bob", 1_000).unwrap().expect("ban present");
        assert_eq!(ban.reason, "physics_hard_fail");
        assert!(store.get_ban("bob", 301_000).unwrap().is_none(), "ban should expire");

        store.set_ban("bob", "again".into(), 300, 0).unwrap();
        store.clear_ban("bob").unwrap();
        assert!(store.get_ban("bob", 0).unwrap().is_none());
    }

    #[test]
    fn strikes_accumulate_and_expire() {
        let store = InMemoryHotStore::new();
        assert_eq!(store.incr_strike("bob", 7, 0).unwrap(), 1);
        assert_eq!(store.incr_strike("bob", 7, 1_000).unwrap(), 2);
        assert_eq!(store.get_strikes("bob", 1_000).unwrap(), 2);

        let eight_days_ms = 8 * 86_400_000;
        assert_eq!(store.get_strikes("bob", eight_days_ms).unwrap(), 0);
        assert_eq!(store.incr_strike("bob", 7, eight_days_ms).unwrap(), 1);
    }

    #[test]
    fn concurrent_updates_all_land_without_losing_any() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(InMemoryHotStore::new());
        store
            .update_transactional("shared", 0, 5, &mut |_| SessionState::new("shared".into(), "alice".into(), 0))
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                store
                    .update_transactional("shared", 0, 10, &mut |cur| {
                        let mut state = cur.expect("exists");
                        state.consecutive_allows += 1;
                        state
                    })
                    .unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let final_state = store.get("shared", 0).unwrap().unwrap();
        assert_eq!(final_state.consecutive_allows, 8);
    }
}
