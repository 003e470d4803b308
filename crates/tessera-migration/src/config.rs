//! Schema initialization config

use crate::error::{MigrationError, MigrationResult};
use crate::schema::{Schema, SchemaBucket};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_store::KvStore;
use tracing::debug;

/// Schema versions to register when a store is first set up.
///
/// ```toml
/// [[initialize]]
/// pkg = "accounts"
/// version = 1
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Entries applied in order
    #[serde(default)]
    pub initialize: Vec<Schema>,
}

impl SchemaConfig {
    /// Parse config from a TOML document
    pub fn from_toml_str(content: &str) -> MigrationResult<Self> {
        toml::from_str(content).map_err(|e| MigrationError::Config(e.to_string()))
    }

    /// Load config from a TOML file
    pub fn load(path: impl AsRef<Path>) -> MigrationResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Render config as TOML
    pub fn to_toml_string(&self) -> MigrationResult<String> {
        toml::to_string_pretty(self).map_err(|e| MigrationError::Config(e.to_string()))
    }

    /// Register every listed schema version that is not registered yet.
    ///
    /// Returns how many versions were created. Entries must still be
    /// sequential per package.
    pub fn initialize(&self, db: &mut dyn KvStore) -> MigrationResult<usize> {
        let schemas = SchemaBucket::new();
        let mut created = 0;
        for schema in &self.initialize {
            if schema.version <= schemas.current_or_zero(&*db, &schema.pkg)? {
                debug!(pkg = %schema.pkg, version = schema.version, "schema already registered");
                continue;
            }
            schemas.create(db, schema)?;
            created += 1;
        }
        Ok(created)
    }
}
