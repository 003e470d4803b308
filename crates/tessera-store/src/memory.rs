//! In-memory B-tree store

use crate::error::StorageResult;
use crate::traits::{is_empty_range, range_bounds, KvIterator, KvPair, KvStore, ReadOnlyKvStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// In-memory ordered key/value store.
///
/// Clones share the same underlying map, so several overlays can be created
/// against one backing store. Iterators see a snapshot of their range taken
/// when they were created.
#[derive(Clone, Default)]
pub struct MemStore {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get number of stored keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Copy out every stored pair in key order
    pub fn snapshot(&self) -> Vec<KvPair> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn collect_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Vec<KvPair> {
        if is_empty_range(start, end) {
            return Vec::new();
        }
        self.data
            .read()
            .range::<[u8], _>(range_bounds(start, end))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStore").field("len", &self.len()).finish()
    }
}

impl ReadOnlyKvStore for MemStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn has(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.data.read().contains_key(key))
    }

    fn iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> StorageResult<KvIterator<'_>> {
        let items = self.collect_range(start, end);
        Ok(Box::new(items.into_iter().map(Ok)))
    }

    fn reverse_iterator(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> StorageResult<KvIterator<'_>> {
        let items = self.collect_range(start, end);
        Ok(Box::new(items.into_iter().rev().map(Ok)))
    }
}

impl KvStore for MemStore {
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.data.write().insert(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> StorageResult<()> {
        self.data.write().remove(key);
        Ok(())
    }
}
