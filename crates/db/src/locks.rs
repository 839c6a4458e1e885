//! Per-key async mutexes.
//!
//! [`KeyedLocks`] hands out one `tokio::sync::Mutex` per string key, created
//! on first use. The record store keys it by collection name; the windowed
//! counter keys it by client and keeps its counter state inside the slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};

use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct KeyedLocks<V = ()> {
    slots: StdMutex<HashMap<String, Arc<Mutex<V>>>>,
}

impl<V: Default> Default for KeyedLocks<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Default> KeyedLocks<V> {
    pub fn new() -> Self {
        Self {
            slots: StdMutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<V> {
        let slot = {
            let mut slots = self.slots();
            Arc::clone(slots.entry(key.to_string()).or_default())
        };
        slot.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop idle slots whose value fails `keep`. Returns how many were dropped.
    ///
    /// A slot is idle when nothing outside the map holds it: nobody is
    /// waiting on it or holding its guard. Busy slots are always kept.
    pub fn retain_idle(&self, mut keep: impl FnMut(&V) -> bool) -> usize {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(value) => keep(&*value),
                Err(_) => true,
            }
        });
        before - slots.len()
    }

    fn slots(&self) -> StdMutexGuard<'_, HashMap<String, Arc<Mutex<V>>>> {
        // The map is only touched in short non-panicking sections, so a
        // poisoned lock still holds a consistent map.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}
