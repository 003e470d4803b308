//! Migration error types

use tessera_orm::OrmError;
use tessera_store::StorageError;
use thiserror::Error;

/// Errors raised by schema tracking, migrations and migrating buckets
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Bucket, index or model error
    #[error("orm error: {0}")]
    Orm(#[from] OrmError),

    /// Backing store error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Missing migration step or record from an unknown future schema
    #[error("schema error: {0}")]
    Schema(String),

    /// Malformed registration or schema upgrade
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Package has no registered schema
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid or unreadable configuration
    #[error("invalid config: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Check if this error means "missing"
    pub fn is_not_found(&self) -> bool {
        match self {
            MigrationError::NotFound(_) => true,
            MigrationError::Orm(e) => e.is_not_found(),
            MigrationError::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Check if this is a unique constraint violation
    pub fn is_duplicate(&self) -> bool {
        matches!(self, MigrationError::Orm(e) if e.is_duplicate())
    }

    /// Check if this is a schema error
    pub fn is_schema(&self) -> bool {
        matches!(self, MigrationError::Schema(_))
    }
}

/// Result type for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;
