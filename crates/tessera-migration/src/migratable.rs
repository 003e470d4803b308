//! Records and messages tagged with a schema version

use serde::{Deserialize, Serialize};
use tessera_orm::{OrmError, OrmResult, Validate};

/// A payload carrying the schema version it was written with
pub trait Migratable: Validate {
    /// Schema version, 0 for a payload that was never tagged
    fn schema(&self) -> u32;

    /// Set the schema version
    fn set_schema(&mut self, version: u32);
}

/// Schema tag to embed in migratable models
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metadata {
    /// Schema version
    pub schema: u32,
}

impl Metadata {
    /// Create a tag
    pub fn new(schema: u32) -> Self {
        Self { schema }
    }
}

impl Validate for Metadata {
    fn validate(&self) -> OrmResult<()> {
        if self.schema == 0 {
            return Err(OrmError::InvalidModel("schema version must be at least 1".into()));
        }
        Ok(())
    }
}

impl Migratable for Metadata {
    fn schema(&self) -> u32 {
        self.schema
    }

    fn set_schema(&mut self, version: u32) {
        self.schema = version;
    }
}
