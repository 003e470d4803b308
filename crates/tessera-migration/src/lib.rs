//! # tessera-migration
//!
//! Schema versioning for records stored with `tessera-orm`.
//!
//! This crate provides:
//! - `Migratable`, the schema tag carried by records and messages
//! - `SchemaBucket`, the per-package registry of schema versions
//! - `MigrationRegistry`, sequential per-type migration steps
//! - Migrating bucket wrappers that upgrade records on every read and write
//! - `Handler` wrappers that route or migrate messages by schema
//! - `SchemaConfig`, schema versions to register at startup

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bucket;
mod config;
mod error;
mod handler;
mod migratable;
mod register;
mod schema;

pub use bucket::{MigratingBucket, MigratingModelBucket, MigratingSerialModelBucket};
pub use config::SchemaConfig;
pub use error::{MigrationError, MigrationResult};
pub use handler::{
    Handler, SchemaMigratingHandler, SchemaRoutingHandler, SchemaUpgradeHandler, UpgradeSchemaMsg,
};
pub use migratable::{Metadata, Migratable};
pub use register::{no_modification, refuse_migration, MigrationFn, MigrationRegistry};
pub use schema::{Schema, SchemaBucket, SCHEMA_BUCKET};
