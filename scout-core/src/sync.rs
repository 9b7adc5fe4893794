//! Keyed exclusive access for cells, spawn points and claim scopes.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, entering it even if a previous holder panicked. Critical
/// sections only ever write whole records.
pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lazily created per-key mutexes. Callers clone the slot out, then lock it,
/// so the table itself is only held for the lookup.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, key: &K) -> Arc<Mutex<()>> {
        let mut slots = lock_unpoisoned(&self.slots);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Slots for several keys in ascending key order. Locking them in the
    /// returned order cannot deadlock against another caller doing the same.
    pub fn slots_sorted(&self, keys: &[K]) -> Vec<Arc<Mutex<()>>>
    where
        K: Ord,
    {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();
        keys.iter().map(|key| self.slot(key)).collect()
    }

    /// Drops slots nobody is holding.
    pub fn prune(&self) {
        lock_unpoisoned(&self.slots).retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
