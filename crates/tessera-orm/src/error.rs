//! ORM error types

use tessera_store::StorageError;
use thiserror::Error;

/// Errors raised by buckets, indexes and sequences
#[derive(Debug, Error)]
pub enum OrmError {
    /// Backing store error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Missing key or entity
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique constraint violation
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// Malformed input value
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Malformed call arguments
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not allowed in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Model failed validation
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Stored value does not decode as the bucket's model type
    #[error("type mismatch in bucket {bucket}: {reason}")]
    TypeMismatch {
        /// Bucket name
        bucket: String,
        /// Decoder message
        reason: String,
    },

    /// Index name not registered on the bucket
    #[error("unknown index: {0}")]
    UnknownIndex(String),

    /// Counter exhausted
    #[error("overflow: {0}")]
    Overflow(String),

    /// Encoding error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Decoding error
    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// Corrupted key layout or stored value
    #[error("database error: {0}")]
    Database(String),
}

impl OrmError {
    /// Build a `NotFound` error for a raw key, rendered as hex
    pub fn not_found(key: &[u8]) -> Self {
        OrmError::NotFound(hex::encode(key))
    }

    /// Check if this error means "missing"
    pub fn is_not_found(&self) -> bool {
        match self {
            OrmError::NotFound(_) => true,
            OrmError::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Check if this is a unique constraint violation
    pub fn is_duplicate(&self) -> bool {
        matches!(self, OrmError::Duplicate(_))
    }
}

/// Result type for ORM operations
pub type OrmResult<T> = Result<T, OrmError>;
