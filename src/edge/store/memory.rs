use parking_lot::RwLock;
use std::collections::HashMap;
use crate::edge::store::readiness::{Readiness, ReadyToken};
use crate::edge::warrant::WarrantSet;

/// In-process reference counts, one entry per distinct warrant string.
///
/// Every write takes the map lock exclusively, so `reconcile` and `clear` are
/// observed by readers either entirely or not at all. Readiness lives outside
/// the map lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counts: RwLock<HashMap<String, u32>>,
    ready: Readiness,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.counts.read().contains_key(key)
    }

    /// Current reference count, zero when absent.
    pub fn count(&self, key: &str) -> u32 {
        self.counts.read().get(key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.read().is_empty()
    }

    pub fn set(&self, key: &str, count: u32) {
        let mut counts = self.counts.write();
        if count == 0 {
            counts.remove(key);
        } else {
            counts.insert(key.to_string(), count);
        }
    }

    pub fn incr(&self, key: &str) {
        let mut counts = self.counts.write();
        let count = counts.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
    }

    pub fn decr(&self, key: &str) {
        let mut counts = self.counts.write();
        let Some(count) = counts.get_mut(key) else {
            return;
        };
        if *count > 1 {
            *count -= 1;
            return;
        }
        counts.remove(key);
    }

    pub fn reconcile(&self, warrants: &WarrantSet) {
        let mut counts = self.counts.write();

        // drop anything upstream no longer has, refresh the rest
        counts.retain(|key, count| {
            if warrants.has(key) {
                *count = warrants.get(key);
                true
            } else {
                false
            }
        });

        for (key, &count) in warrants {
            if !counts.contains_key(key.as_str()) {
                counts.insert(key.clone(), count);
            }
        }

        // a zero in the snapshot must not leave a stored zero behind
        counts.retain(|_, count| *count > 0);
    }

    pub fn clear(&self) {
        *self.counts.write() = HashMap::new();
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.set(ready);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    pub fn ready_token(&self) -> Option<ReadyToken> {
        self.ready.token()
    }
}
