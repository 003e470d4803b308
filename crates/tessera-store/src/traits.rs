//! Key/value store traits shared by every backend and overlay

use crate::error::StorageResult;
use std::ops::Bound;

/// A raw key/value pair as yielded by store iterators
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Boxed iterator over a key range.
///
/// Dropping the iterator releases it. It borrows the store it was created
/// from, so the covered keyspace cannot be written while it is alive.
pub type KvIterator<'a> = Box<dyn Iterator<Item = StorageResult<KvPair>> + 'a>;

/// Read access to a key/value store.
///
/// Keys are ordered by unsigned lexicographic comparison. Range bounds are
/// `[start, end)`; `None` means unbounded on that side.
pub trait ReadOnlyKvStore {
    /// Get the value stored under `key`
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Check if a value is stored under `key`
    fn has(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Iterate `[start, end)` in ascending key order
    fn iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> StorageResult<KvIterator<'_>>;

    /// Iterate `[start, end)` in descending key order
    fn reverse_iterator(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> StorageResult<KvIterator<'_>>;
}

/// Write access to a key/value store
pub trait KvStore: ReadOnlyKvStore {
    /// Store `value` under `key`
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&mut self, key: &[u8]) -> StorageResult<()>;

    /// Apply a batch of operations in issue order.
    ///
    /// The default implementation stops at the first failing operation and
    /// leaves the earlier ones applied. Backends with native batches override
    /// this to make the whole batch atomic.
    fn write_batch(&mut self, batch: Batch) -> StorageResult<()> {
        for op in batch.into_ops() {
            match op {
                Op::Set { key, value } => self.set(key, value)?,
                Op::Delete { key } => self.delete(&key)?,
            }
        }
        Ok(())
    }
}

/// A single buffered write
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// Set a key
    Set {
        /// Key
        key: Vec<u8>,
        /// Value
        value: Vec<u8>,
    },
    /// Delete a key
    Delete {
        /// Key
        key: Vec<u8>,
    },
}

impl Op {
    /// Key touched by this operation
    pub fn key(&self) -> &[u8] {
        match self {
            Op::Set { key, .. } | Op::Delete { key } => key,
        }
    }
}

/// Ordered list of write operations
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<Op>,
}

impl Batch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a set operation
    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(Op::Set { key, value });
    }

    /// Add a delete operation
    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(Op::Delete { key });
    }

    /// Buffered operations in issue order
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Take the buffered operations
    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }

    /// Get number of operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Check if batch is empty
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl From<Vec<Op>> for Batch {
    fn from(ops: Vec<Op>) -> Self {
        Self { ops }
    }
}

/// True when `[start, end)` cannot contain any key
pub(crate) fn is_empty_range(start: Option<&[u8]>, end: Option<&[u8]>) -> bool {
    matches!((start, end), (Some(s), Some(e)) if s >= e)
}

/// Convert optional range ends into `BTreeMap::range` bounds
pub(crate) fn range_bounds<'a>(
    start: Option<&'a [u8]>,
    end: Option<&'a [u8]>,
) -> (Bound<&'a [u8]>, Bound<&'a [u8]>) {
    let lower = start.map_or(Bound::Unbounded, Bound::Included);
    let upper = end.map_or(Bound::Unbounded, Bound::Excluded);
    (lower, upper)
}

impl<T: ReadOnlyKvStore + ?Sized> ReadOnlyKvStore for &T {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn has(&self, key: &[u8]) -> StorageResult<bool> {
        (**self).has(key)
    }

    fn iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> StorageResult<KvIterator<'_>> {
        (**self).iterator(start, end)
    }

    fn reverse_iterator(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> StorageResult<KvIterator<'_>> {
        (**self).reverse_iterator(start, end)
    }
}

impl<T: ReadOnlyKvStore + ?Sized> ReadOnlyKvStore for &mut T {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn has(&self, key: &[u8]) -> StorageResult<bool> {
        (**self).has(key)
    }

    fn iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> StorageResult<KvIterator<'_>> {
        (**self).iterator(start, end)
    }

    fn reverse_iterator(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> StorageResult<KvIterator<'_>> {
        (**self).reverse_iterator(start, end)
    }
}

impl<T: KvStore + ?Sized> KvStore for &mut T {
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> StorageResult<()> {
        (**self).delete(key)
    }

    fn write_batch(&mut self, batch: Batch) -> StorageResult<()> {
        (**self).write_batch(batch)
    }
}

impl<T: ReadOnlyKvStore + ?Sized> ReadOnlyKvStore for Box<T> {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn has(&self, key: &[u8]) -> StorageResult<bool> {
        (**self).has(key)
    }

    fn iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> StorageResult<KvIterator<'_>> {
        (**self).iterator(start, end)
    }

    fn reverse_iterator(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> StorageResult<KvIterator<'_>> {
        (**self).reverse_iterator(start, end)
    }
}

impl<T: KvStore + ?Sized> KvStore for Box<T> {
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> StorageResult<()> {
        (**self).delete(key)
    }

    fn write_batch(&mut self, batch: Batch) -> StorageResult<()> {
        (**self).write_batch(batch)
    }
}
