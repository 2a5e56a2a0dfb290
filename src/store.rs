//! Narrow record-store contract the engine components persist through.

use anyhow::Result;
use std::collections::BTreeMap;

/// Per-entity keyed storage with an explicit flush.
///
/// Implementations may buffer writes; `sync` must not return until every
/// prior `put`/`delete` is durable, and must report failure if it cannot.
pub trait RecordStore {
    type Key;
    type Record;

    fn get(&self, key: &Self::Key) -> Result<Option<Self::Record>>;

    fn put(&mut self, key: &Self::Key, record: &Self::Record) -> Result<()>;

    /// Remove a record. Returns whether it existed.
    fn delete(&mut self, key: &Self::Key) -> Result<bool>;

    /// All records, in key order.
    fn iterate(&self) -> Result<Vec<(Self::Key, Self::Record)>>;

    fn sync(&mut self) -> Result<()>;
}

/// In-memory store, used for tests and for embedding without persistence.
#[derive(Debug, Clone)]
pub struct MemoryStore<K, V> {
    records: BTreeMap<K, V>,
    syncs: usize,
}

impl<K: Ord, V> MemoryStore<K, V> {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            syncs: 0,
        }
    }

    /// Number of times `sync` has been called.
    pub fn sync_count(&self) -> usize {
        self.syncs
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<K: Ord, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V: Clone> RecordStore for MemoryStore<K, V> {
    type Key = K;
    type Record = V;

    fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(self.records.get(key).cloned())
    }

    fn put(&mut self, key: &K, record: &V) -> Result<()> {
        self.records.insert(key.clone(), record.clone());
        Ok(())
    }

    fn delete(&mut self, key: &K) -> Result<bool> {
        Ok(self.records.remove(key).is_some())
    }

    fn iterate(&self) -> Result<Vec<(K, V)>> {
        Ok(self
            .records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn sync(&mut self) -> Result<()> {
        self.syncs += 1;
        Ok(())
    }
}
