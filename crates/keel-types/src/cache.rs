//! Keyed cache with single-flight loading and freshness-driven reloads.
//!
//! Every key owns a slot guarded by an async mutex. A caller that finds the
//! slot empty (or stale according to its freshness predicate) loads the value
//! while holding the slot lock, so concurrent first loads of one key run the
//! loader exactly once and the other callers observe the stored value.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

type Slot<V> = Arc<tokio::sync::Mutex<Option<V>>>;

pub struct LoadCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> LoadCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        // A panic while holding the map lock cannot leave the map half-updated.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, key: &K) -> Slot<V> {
        self.slots()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }

    /// Return the cached value for `key` if `is_fresh` accepts it, otherwise
    /// run `load` and replace the entry.
    ///
    /// The boolean is `true` when the value came from the cache. A failed
    /// load leaves any previous entry in place.
    pub async fn get_or_load<P, F, Fut, E>(
        &self,
        key: &K,
        is_fresh: P,
        load: F,
    ) -> Result<(V, bool), E>
    where
        P: FnOnce(&V) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        if let Some(value) = guard.as_ref() {
            if is_fresh(value) {
                return Ok((value.clone(), true));
            }
        }
        let value = load().await?;
        *guard = Some(value.clone());
        Ok((value, false))
    }

    /// Current value for `key` without loading. Returns `None` while a load
    /// for the key is in flight.
    pub fn peek(&self, key: &K) -> Option<V> {
        let slot = self.slots().get(key)?.clone();
        let guard = slot.try_lock().ok()?;
        (*guard).clone()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.slots().clear();
    }

    /// Number of populated entries.
    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot.try_lock(), Ok(guard) if guard.is_some()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for LoadCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
