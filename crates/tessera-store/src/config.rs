//! Backend configuration

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// RocksDB backend configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    /// Create database if missing
    #[serde(default = "default_create_if_missing")]
    pub create_if_missing: bool,
    /// Maximum number of open files
    #[serde(default = "default_max_open_files")]
    pub max_open_files: i32,
    /// Write buffer size
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,
    /// Maximum write buffers
    #[serde(default = "default_max_write_buffer_number")]
    pub max_write_buffer_number: i32,
}

fn default_create_if_missing() -> bool {
    true
}

fn default_max_open_files() -> i32 {
    512
}

fn default_write_buffer_size() -> usize {
    64 * 1024 * 1024 // 64MB
}

fn default_max_write_buffer_number() -> i32 {
    3
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            create_if_missing: default_create_if_missing(),
            max_open_files: default_max_open_files(),
            write_buffer_size: default_write_buffer_size(),
            max_write_buffer_number: default_max_write_buffer_number(),
        }
    }
}

impl DbConfig {
    /// Parse config from a TOML document. Missing fields take defaults.
    pub fn from_toml_str(content: &str) -> StorageResult<Self> {
        toml::from_str(content).map_err(|e| StorageError::Config(e.to_string()))
    }

    /// Load config from a TOML file
    pub fn load(path: impl AsRef<Path>) -> StorageResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Render config as TOML
    pub fn to_toml_string(&self) -> StorageResult<String> {
        toml::to_string_pretty(self).map_err(|e| StorageError::Config(e.to_string()))
    }
}
