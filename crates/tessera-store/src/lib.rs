//! # tessera-store
//!
//! Key/value storage layer for Tessera.
//!
//! This crate provides:
//! - `ReadOnlyKvStore` / `KvStore` traits with ordered range iteration
//! - `MemStore`, an in-memory B-tree backend
//! - `RocksStore`, a persistent RocksDB backend with atomic batches
//! - `CacheOverlay`, a copy-on-write transaction layer that can be nested
//! - `MergeIterator` and `prefix_range` for ordered scans over overlays

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
mod config;
mod db;
mod error;
mod iterator;
mod memory;
mod traits;

pub use cache::{CacheOverlay, CacheWrap};
pub use config::DbConfig;
pub use db::RocksStore;
pub use error::{StorageError, StorageResult};
pub use iterator::{prefix_range, MergeIterator, OverlayEntries};
pub use memory::MemStore;
pub use traits::{Batch, KvIterator, KvPair, KvStore, Op, ReadOnlyKvStore};
