//! Process-wide cache of identities whose gate flag is known to be set.
//!
//! The cache is monotone: only positive answers are stored, so absence means
//! "unknown, consult the store". Admin writes invalidate the entry before
//! touching the store; it is repopulated only by a subsequent positive read.
//! Misses are cheap, which keeps any future bounding (LRU, TTL) a drop-in.

use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct StarCache {
    entries: Mutex<HashSet<String>>,
}

impl StarCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.lock().contains(identity)
    }

    pub fn insert(&self, identity: &str) {
        self.lock().insert(identity.to_string());
    }

    pub fn invalidate(&self, identity: &str) {
        self.lock().remove(identity);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
