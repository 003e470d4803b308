//! Copy-on-write overlay over any store

use crate::error::StorageResult;
use crate::iterator::MergeIterator;
use crate::traits::{
    is_empty_range, range_bounds, Batch, KvIterator, KvStore, Op, ReadOnlyKvStore,
};
use std::collections::BTreeMap;

/// Copy-on-write transaction layer.
///
/// Writes are buffered in an ordered map (with tombstones for deletes) and
/// in an operation log. Reads consult the buffer first and fall back to the
/// parent only on a true miss. Nothing reaches the parent until
/// [`CacheOverlay::write`].
pub struct CacheOverlay<S> {
    parent: S,
    /// Latest buffered state per key (`None` = deleted)
    items: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// Buffered operations in issue order
    ops: Vec<Op>,
}

impl<S: ReadOnlyKvStore> CacheOverlay<S> {
    /// Create a new overlay on top of `parent`
    pub fn new(parent: S) -> Self {
        Self {
            parent,
            items: BTreeMap::new(),
            ops: Vec::new(),
        }
    }

    /// Get the parent store
    pub fn parent(&self) -> &S {
        &self.parent
    }

    /// Drop the overlay and hand back the parent, discarding buffered writes
    pub fn into_parent(self) -> S {
        self.parent
    }

    /// Get number of buffered operations
    pub fn pending(&self) -> usize {
        self.ops.len()
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Drop every buffered write. Never touches the parent.
    pub fn discard(&mut self) {
        if !self.ops.is_empty() {
            tracing::trace!(ops = self.ops.len(), "discarding overlay");
        }
        self.items.clear();
        self.ops.clear();
    }
}

impl<S: KvStore> CacheOverlay<S> {
    /// Flush buffered operations to the parent in issue order and clear
    /// the overlay.
    ///
    /// On error the overlay is still cleared. Whether the parent kept a
    /// prefix of the batch depends on the parent: native batches are
    /// atomic, the default implementation stops at the failing operation.
    /// Either way the caller should abandon the enclosing unit of work.
    pub fn write(&mut self) -> StorageResult<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        let batch = Batch::from(std::mem::take(&mut self.ops));
        self.items.clear();
        tracing::debug!(ops = batch.len(), "flushing overlay to parent");
        self.parent.write_batch(batch)
    }
}

impl<S: ReadOnlyKvStore> ReadOnlyKvStore for CacheOverlay<S> {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        match self.items.get(key) {
            Some(buffered) => Ok(buffered.clone()),
            None => self.parent.get(key),
        }
    }

    fn has(&self, key: &[u8]) -> StorageResult<bool> {
        match self.items.get(key) {
            Some(buffered) => Ok(buffered.is_some()),
            None => self.parent.has(key),
        }
    }

    fn iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> StorageResult<KvIterator<'_>> {
        if is_empty_range(start, end) {
            return Ok(Box::new(std::iter::empty()));
        }
        let parent = self.parent.iterator(start, end)?;
        let overlay = self.items.range::<[u8], _>(range_bounds(start, end));
        Ok(Box::new(MergeIterator::new(parent, Box::new(overlay), true)))
    }

    fn reverse_iterator(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> StorageResult<KvIterator<'_>> {
        if is_empty_range(start, end) {
            return Ok(Box::new(std::iter::empty()));
        }
        let parent = self.parent.reverse_iterator(start, end)?;
        let overlay = self.items.range::<[u8], _>(range_bounds(start, end)).rev();
        Ok(Box::new(MergeIterator::new(parent, Box::new(overlay), false)))
    }
}

impl<S: ReadOnlyKvStore> KvStore for CacheOverlay<S> {
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.items.insert(key.clone(), Some(value.clone()));
        self.ops.push(Op::Set { key, value });
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> StorageResult<()> {
        self.items.insert(key.to_vec(), None);
        self.ops.push(Op::Delete { key: key.to_vec() });
        Ok(())
    }

    fn write_batch(&mut self, batch: Batch) -> StorageResult<()> {
        for op in batch.into_ops() {
            match &op {
                Op::Set { key, value } => {
                    self.items.insert(key.clone(), Some(value.clone()));
                }
                Op::Delete { key } => {
                    self.items.insert(key.clone(), None);
                }
            }
            self.ops.push(op);
        }
        Ok(())
    }
}

/// Create overlays on top of any store
pub trait CacheWrap: ReadOnlyKvStore {
    /// Wrap `self` in a fresh overlay
    fn cache_wrap(&mut self) -> CacheOverlay<&mut Self> {
        CacheOverlay::new(self)
    }
}

impl<T: ReadOnlyKvStore + ?Sized> CacheWrap for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemStore;

    fn seeded() -> MemStore {
        let mut store = MemStore::new();
        store.set(b"a".to_vec(), b"1".to_vec()).unwrap();
        store.set(b"b".to_vec(), b"2".to_vec()).unwrap();
        store.set(b"c".to_vec(), b"3".to_vec()).unwrap();
        store
    }

    fn keys(iter: KvIterator<'_>) -> Vec<Vec<u8>> {
        iter.map(|item| item.unwrap().0).collect()
    }

    // ==================== Read/Write Tests ====================

    #[test]
    fn test_read_your_writes() {
        let mut store = seeded();
        let mut overlay = store.cache_wrap();

        overlay.set(b"a".to_vec(), b"10".to_vec()).unwrap();
        overlay.set(b"z".to_vec(), b"26".to_vec()).unwrap();

        assert_eq!(overlay.get(b"a").unwrap(), Some(b"10".to_vec()));
        assert_eq!(overlay.get(b"z").unwrap(), Some(b"26".to_vec()));
        assert_eq!(overlay.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_tombstone_hides_parent() {
        let mut store = seeded();
        let mut overlay = store.cache_wrap();

        overlay.delete(b"b").unwrap();
        assert_eq!(overlay.get(b"b").unwrap(), None);
        assert!(!overlay.has(b"b").unwrap());
        assert!(overlay.has(b"a").unwrap());
    }

    #[test]
    fn test_write_flushes_in_order() {
        let mut store = seeded();
        {
            let mut overlay = store.cache_wrap();
            overlay.set(b"d".to_vec(), b"4".to_vec()).unwrap();
            overlay.delete(b"d").unwrap();
            overlay.set(b"e".to_vec(), b"5".to_vec()).unwrap();
            overlay.delete(b"a").unwrap();
            assert_eq!(overlay.pending(), 4);

            overlay.write().unwrap();
            assert!(overlay.is_empty());
        }

        assert_eq!(store.get(b"d").unwrap(), None);
        assert_eq!(store.get(b"e").unwrap(), Some(b"5".to_vec()));
        assert_eq!(store.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_discard_leaves_parent_untouched() {
        let mut store = seeded();
        let before = store.snapshot();
        {
            let mut overlay = store.cache_wrap();
            overlay.set(b"a".to_vec(), b"x".to_vec()).unwrap();
            overlay.delete(b"c").unwrap();
            overlay.discard();
            assert!(overlay.is_empty());
            assert_eq!(overlay.get(b"a").unwrap(), Some(b"1".to_vec()));
            overlay.write().unwrap();
        }
        assert_eq!(store.snapshot(), before);
    }

    // ==================== Nesting Tests ====================

    #[test]
    fn test_nested_overlay_isolation() {
        let mut store = seeded();
        let mut block = store.cache_wrap();
        block.set(b"block".to_vec(), b"yes".to_vec()).unwrap();

        {
            let mut tx = block.cache_wrap();
            tx.set(b"tx".to_vec(), b"yes".to_vec()).unwrap();
            assert_eq!(tx.get(b"block").unwrap(), Some(b"yes".to_vec()));
            assert_eq!(tx.parent().get(b"tx").unwrap(), None);
            tx.write().unwrap();
        }
        assert_eq!(block.get(b"tx").unwrap(), Some(b"yes".to_vec()));

        {
            let mut failed_tx = block.cache_wrap();
            failed_tx.set(b"failed".to_vec(), b"no".to_vec()).unwrap();
            failed_tx.discard();
        }
        assert_eq!(block.get(b"failed").unwrap(), None);

        block.write().unwrap();
        assert_eq!(store.get(b"tx").unwrap(), Some(b"yes".to_vec()));
        assert_eq!(store.get(b"block").unwrap(), Some(b"yes".to_vec()));
        assert_eq!(store.get(b"failed").unwrap(), None);
    }

    #[test]
    fn test_shared_parent_read_only_overlays() {
        let store = seeded();
        let mut first = CacheOverlay::new(&store);
        let mut second = CacheOverlay::new(&store);

        first.set(b"a".to_vec(), b"first".to_vec()).unwrap();
        second.delete(b"a").unwrap();

        assert_eq!(first.get(b"a").unwrap(), Some(b"first".to_vec()));
        assert_eq!(second.get(b"a").unwrap(), None);
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    // ==================== Iterator Tests ====================

    #[test]
    fn test_iterator_merges_overlay() {
        let mut store = seeded();
        let mut overlay = store.cache_wrap();
        overlay.set(b"bb".to_vec(), b"x".to_vec()).unwrap();
        overlay.delete(b"c").unwrap();
        overlay.set(b"a".to_vec(), b"y".to_vec()).unwrap();

        let items: Vec<_> = overlay
            .iterator(None, None)
            .unwrap()
            .map(|i| i.unwrap())
            .collect();
        assert_eq!(
            items,
            vec![
                (b"a".to_vec(), b"y".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"bb".to_vec(), b"x".to_vec()),
            ]
        );

        assert_eq!(
            keys(overlay.reverse_iterator(Some(b"a"), Some(b"c")).unwrap()),
            vec![b"bb".to_vec(), b"b".to_vec(), b"a".to_vec()]
        );
    }

    #[test]
    fn test_iterator_empty_range() {
        let mut store = seeded();
        let overlay = store.cache_wrap();
        assert!(keys(overlay.iterator(Some(b"b"), Some(b"b")).unwrap()).is_empty());
        assert!(keys(overlay.reverse_iterator(Some(b"c"), Some(b"a")).unwrap()).is_empty());
    }

    #[test]
    fn test_nested_iterator_sees_all_layers() {
        let mut store = seeded();
        let mut block = store.cache_wrap();
        block.delete(b"a").unwrap();
        block.set(b"d".to_vec(), b"4".to_vec()).unwrap();
        let mut tx = block.cache_wrap();
        tx.set(b"a".to_vec(), b"back".to_vec()).unwrap();
        tx.delete(b"b").unwrap();

        assert_eq!(
            keys(tx.iterator(None, None).unwrap()),
            vec![b"a".to_vec(), b"c".to_vec(), b"d".to_vec()]
        );
    }
}
