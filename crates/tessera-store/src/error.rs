//! Storage error types

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// RocksDB error
    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Key not found
    #[error("key not found: {0}")]
    NotFound(String),

    /// Invalid data format
    #[error("invalid data format: {0}")]
    InvalidFormat(String),

    /// Invalid or unreadable configuration
    #[error("invalid config: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Build a `NotFound` error for a raw key, rendered as hex
    pub fn not_found(key: &[u8]) -> Self {
        StorageError::NotFound(hex::encode(key))
    }

    /// Check if this is a `NotFound` error
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_renders_hex() {
        let err = StorageError::not_found(&[0xab, 0x01]);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "key not found: ab01");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: StorageError = io.into();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(!err.is_not_found());
    }
}
