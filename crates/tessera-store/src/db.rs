//! RocksDB backend

use crate::config::DbConfig;
use crate::error::{StorageError, StorageResult};
use crate::traits::{is_empty_range, Batch, KvIterator, KvStore, Op, ReadOnlyKvStore};
use rocksdb::{DBWithThreadMode, IteratorMode, MultiThreaded, Options, ReadOptions, WriteBatch};
use std::path::{Path, PathBuf};
use std::sync::Arc;

type RocksDB = DBWithThreadMode<MultiThreaded>;

/// Persistent key/value store backed by RocksDB.
///
/// Clones share the same open database. Batches are written with a native
/// `WriteBatch`, so flushing an overlay into this store is atomic.
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<RocksDB>,
    path: PathBuf,
}

impl RocksStore {
    /// Open the database with default config
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open_with_config(path, &DbConfig::default())
    }

    /// Open the database with custom config
    pub fn open_with_config(path: impl AsRef<Path>, config: &DbConfig) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut opts = Options::default();
        opts.create_if_missing(config.create_if_missing);
        opts.set_max_open_files(config.max_open_files);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);

        let db = RocksDB::open(&opts, &path)?;
        tracing::info!(path = %path.display(), "opened rocksdb store");
        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    /// Get database path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn read_options(start: Option<&[u8]>, end: Option<&[u8]>) -> ReadOptions {
        let mut opts = ReadOptions::default();
        if let Some(start) = start {
            opts.set_iterate_lower_bound(start.to_vec());
        }
        if let Some(end) = end {
            opts.set_iterate_upper_bound(end.to_vec());
        }
        opts
    }

    fn range_iter(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        mode: IteratorMode<'_>,
    ) -> KvIterator<'_> {
        if is_empty_range(start, end) {
            return Box::new(std::iter::empty());
        }
        let iter = self
            .db
            .iterator_opt(mode, Self::read_options(start, end))
            .map(|item| {
                item.map(|(k, v)| (k.into_vec(), v.into_vec()))
                    .map_err(StorageError::from)
            });
        Box::new(iter)
    }
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore").field("path", &self.path).finish()
    }
}

impl ReadOnlyKvStore for RocksStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    fn iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> StorageResult<KvIterator<'_>> {
        Ok(self.range_iter(start, end, IteratorMode::Start))
    }

    fn reverse_iterator(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> StorageResult<KvIterator<'_>> {
        Ok(self.range_iter(start, end, IteratorMode::End))
    }
}

impl KvStore for RocksStore {
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.db.put(key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> StorageResult<()> {
        self.db.delete(key)?;
        Ok(())
    }

    fn write_batch(&mut self, batch: Batch) -> StorageResult<()> {
        let mut rocks_batch = WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                Op::Set { key, value } => rocks_batch.put(key, value),
                Op::Delete { key } => rocks_batch.delete(key),
            }
        }
        self.db.write(rocks_batch)?;
        Ok(())
    }
}
