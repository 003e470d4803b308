//! # tessera-orm
//!
//! Typed object storage on top of `tessera-store`.
//!
//! This crate provides:
//! - `Model` / `SerialModel` traits with a deterministic bincode codec
//! - `Bucket`, a namespaced collection kept consistent with its `Index`es
//! - `ModelBucket` / `SerialModelBucket` for typed CRUD with key allocation
//! - `Sequence`, persistent monotonic counters
//! - `VersioningBucket`, an append-only store of record versions
//!
//! ## Key layout
//!
//! | entry | key |
//! |-------|-----|
//! | object | `<bucket> ":" <key>` |
//! | index entry | `"_i:" <bucket> ":" <index> ":" <secondary key>` |
//! | sequence | `"_s." <bucket> ":" <name>` |
//!
//! Reserved buckets (`Bucket::reserved`) use `"_" <bucket>` in place of
//! `<bucket>` in all three layouts.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bucket;
mod error;
mod index;
mod model;
mod model_bucket;
mod multiref;
mod object;
mod sequence;
mod versioning;

pub use bucket::{is_valid_name, Bucket, IndexedObjIter, ObjIter, MAX_NAME_LEN, MIN_NAME_LEN};
pub use error::{OrmError, OrmResult};
pub use index::{Index, IndexRefs, MultiKeyIndexer, INDEX_PREFIX};
pub use model::{decode, encode, require_non_empty, Model, SerialModel, Validate};
pub use model_bucket::{ModelBucket, SerialModelBucket, ID_SEQUENCE};
pub use multiref::MultiRef;
pub use object::Obj;
pub use sequence::{decode_sequence, encode_sequence, Sequence, SEQUENCE_PREFIX};
pub use versioning::{Versioned, VersionedIdRef, VersioningBucket};
