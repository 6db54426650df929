//! MemoryStore: in-memory `DataStore` with an observable durable copy
//!
//! - `BTreeMap<K, V>` under `parking_lot::RwLock` for the live data
//! - `persist()` copies the live map into a second "persisted" map, so
//!   callers can inspect exactly what a checkpoint made durable
//! - `sync()` and `persist()` calls are counted

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tidemark_core::{DataStore, Result};

/// In-memory key-value store
#[derive(Debug)]
pub struct MemoryStore<K, V> {
    data: RwLock<BTreeMap<K, V>>,
    persisted: RwLock<BTreeMap<K, V>>,
    sync_count: AtomicU64,
    persist_count: AtomicU64,
}

impl<K: Ord + Clone, V: Clone> MemoryStore<K, V> {
    /// Create an empty store
    pub fn new() -> Self {
        MemoryStore {
            data: RwLock::new(BTreeMap::new()),
            persisted: RwLock::new(BTreeMap::new()),
            sync_count: AtomicU64::new(0),
            persist_count: AtomicU64::new(0),
        }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True when no keys are live
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Copy of the live map
    pub fn snapshot(&self) -> BTreeMap<K, V> {
        self.data.read().clone()
    }

    /// Copy of the map as of the last `persist()`
    pub fn persisted(&self) -> BTreeMap<K, V> {
        self.persisted.read().clone()
    }

    /// Number of `sync()` calls so far
    pub fn sync_count(&self) -> u64 {
        self.sync_count.load(Ordering::SeqCst)
    }

    /// Number of `persist()` calls so far
    pub fn persist_count(&self) -> u64 {
        self.persist_count.load(Ordering::SeqCst)
    }
}

impl<K: Ord + Clone, V: Clone> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> DataStore<K, V> for MemoryStore<K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: K, value: V) -> Result<()> {
        self.data.write().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &K) -> Result<bool> {
        Ok(self.data.write().remove(key).is_some())
    }

    fn sync(&self) -> Result<()> {
        self.sync_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let live = self.data.read().clone();
        *self.persisted.write() = live;
        self.persist_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
