//! Per-user learning locks (spec.md §4.8 "Learning & persistence": selective
//! learning "must not block the evaluate request path"). A learning pass
//! that can't acquire its lock is skipped outright rather than queued —
//! losing one training update is free, stalling a request on someone
//! else's write is not.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::model::user_model::ModelType;

type LockKey = (String, ModelType);

pub struct LearningLocks {
    held: DashMap<LockKey, ()>,
}

impl LearningLocks {
    pub fn new() -> Self {
        Self { held: DashMap::new() }
    }

    /// Non-blocking acquire. `None` means another learning pass for this
    /// `(user_id, model_type)` is already in flight; the caller should skip
    /// learning for this evaluate and move on.
    pub fn try_acquire(&self, user_id: &str, model_type: ModelType) -> Option<LearningGuard<'_>> {
        let key = (user_id.to_string(), model_type);
        match self.held.entry(key.clone()) {
            Entry::Vacant(v) => {
                v.insert(());
                Some(LearningGuard { locks: self, key })
            }
            Entry::Occupied(_) => None,
        }
    }
}

impl Default for LearningLocks {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LearningGuard<'a> {
    locks: &'a LearningLocks,
    key: LockKey,
}

impl Drop for LearningGuard<'_> {
    fn drop(&mut self) {
        self.locks.held.remove(&self.key);
    }
}
