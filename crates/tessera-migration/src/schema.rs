//! Per-package schema versions

use crate::error::{MigrationError, MigrationResult};
use serde::{Deserialize, Serialize};
use tessera_orm::{is_valid_name, Bucket, Model, Obj, OrmError, OrmResult, Validate};
use tessera_store::{KvStore, ReadOnlyKvStore};
use tracing::info;

/// Bucket holding schema entries, kept in the reserved `_schema:` keyspace
pub const SCHEMA_BUCKET: &str = "schema";

/// One registered schema version of a package
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Package name, following bucket naming rules
    pub pkg: String,
    /// Version, starting at 1
    pub version: u32,
}

impl Schema {
    /// Create a schema entry
    pub fn new(pkg: impl Into<String>, version: u32) -> Self {
        Self {
            pkg: pkg.into(),
            version,
        }
    }
}

impl Validate for Schema {
    fn validate(&self) -> OrmResult<()> {
        if !is_valid_name(&self.pkg) {
            return Err(OrmError::InvalidModel(format!(
                "invalid package name: {:?}",
                self.pkg
            )));
        }
        if self.version == 0 {
            return Err(OrmError::InvalidModel("schema version must be at least 1".into()));
        }
        Ok(())
    }
}

impl Model for Schema {}

/// Storage of schema versions, keyed by `pkg ":" u32_be(version)`.
///
/// Versions of a package are registered strictly in sequence starting at 1,
/// so the current version is the last one before the first gap.
#[derive(Clone, Debug)]
pub struct SchemaBucket {
    bucket: Bucket<Schema>,
}

impl Default for SchemaBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBucket {
    /// Create a handle on the schema bucket
    pub fn new() -> Self {
        Self {
            bucket: Bucket::reserved(SCHEMA_BUCKET),
        }
    }

    /// Primary key of one schema version
    pub fn key(pkg: &str, version: u32) -> Vec<u8> {
        let mut key = Vec::with_capacity(pkg.len() + 5);
        key.extend_from_slice(pkg.as_bytes());
        key.push(b':');
        key.extend_from_slice(&version.to_be_bytes());
        key
    }

    /// Highest registered version of `pkg`, `NotFound` if it has none
    pub fn current_schema(&self, db: &dyn ReadOnlyKvStore, pkg: &str) -> MigrationResult<u32> {
        let mut version = 0u32;
        while let Some(next) = version.checked_add(1) {
            if !self.bucket.has(db, &Self::key(pkg, next))? {
                break;
            }
            version = next;
        }
        if version == 0 {
            return Err(MigrationError::NotFound(format!("schema of package {pkg}")));
        }
        Ok(version)
    }

    /// Highest registered version of `pkg`, 0 if it has none
    pub fn current_or_zero(&self, db: &dyn ReadOnlyKvStore, pkg: &str) -> MigrationResult<u32> {
        match self.current_schema(db, pkg) {
            Ok(version) => Ok(version),
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Register the next schema version of a package
    pub fn create(&self, db: &mut dyn KvStore, schema: &Schema) -> MigrationResult<()> {
        schema.validate()?;
        let current = self.current_or_zero(&*db, &schema.pkg)?;
        if Some(schema.version) != current.checked_add(1) {
            return Err(MigrationError::InvalidInput(format!(
                "package {} is at schema {}, cannot register version {}",
                schema.pkg, current, schema.version
            )));
        }

        let key = Self::key(&schema.pkg, schema.version);
        self.bucket.save(db, &Obj::new(key, schema.clone()))?;
        info!(pkg = %schema.pkg, version = schema.version, "registered schema version");
        Ok(())
    }

    /// Every registered version of `pkg`, ascending
    pub fn versions(&self, db: &dyn ReadOnlyKvStore, pkg: &str) -> MigrationResult<Vec<u32>> {
        let mut prefix = pkg.as_bytes().to_vec();
        prefix.push(b':');
        self.bucket
            .prefix_scan(db, &prefix, false)?
            .map(|obj| -> MigrationResult<u32> { Ok(obj?.value().version) })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_store::MemStore;

    // ==================== Layout Tests ====================

    #[test]
    fn test_schema_key_layout() {
        assert_eq!(SchemaBucket::key("accounts", 2), b"accounts:\0\0\0\x02".to_vec());
    }

    #[test]
    fn test_schema_validate() {
        assert!(Schema::new("accounts", 1).validate().is_ok());
        assert!(Schema::new("accounts", 0).validate().is_err());
        assert!(Schema::new("Bad Name", 1).validate().is_err());
    }

    // ==================== Versioning Tests ====================

    #[test]
    fn test_current_schema_not_found() {
        let db = MemStore::new();
        let schemas = SchemaBucket::new();
        assert!(schemas.current_schema(&db, "accounts").unwrap_err().is_not_found());
        assert_eq!(schemas.current_or_zero(&db, "accounts").unwrap(), 0);
    }

    #[test]
    fn test_create_sequential() {
        let mut db = MemStore::new();
        let schemas = SchemaBucket::new();

        schemas.create(&mut db, &Schema::new("accounts", 1)).unwrap();
        schemas.create(&mut db, &Schema::new("accounts", 2)).unwrap();
        assert_eq!(schemas.current_schema(&db, "accounts").unwrap(), 2);
        assert_eq!(schemas.versions(&db, "accounts").unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_create_rejects_gaps_and_repeats() {
        let mut db = MemStore::new();
        let schemas = SchemaBucket::new();

        let err = schemas
            .create(&mut db, &Schema::new("accounts", 2))
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidInput(_)));

        schemas.create(&mut db, &Schema::new("accounts", 1)).unwrap();
        let err = schemas
            .create(&mut db, &Schema::new("accounts", 1))
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidInput(_)));
    }

    #[test]
    fn test_packages_are_independent() {
        let mut db = MemStore::new();
        let schemas = SchemaBucket::new();
        schemas.create(&mut db, &Schema::new("abc", 1)).unwrap();
        schemas.create(&mut db, &Schema::new("abcd", 1)).unwrap();
        schemas.create(&mut db, &Schema::new("abcd", 2)).unwrap();

        assert_eq!(schemas.current_schema(&db, "abc").unwrap(), 1);
        assert_eq!(schemas.versions(&db, "abc").unwrap(), vec![1]);
        assert_eq!(schemas.current_schema(&db, "abcd").unwrap(), 2);
    }

    #[test]
    fn test_user_bucket_named_schema_is_separate() {
        let mut db = MemStore::new();
        let schemas = SchemaBucket::new();
        let user: Bucket<Schema> = Bucket::new(SCHEMA_BUCKET);

        user.save(
            &mut db,
            &Obj::new(SchemaBucket::key("accounts", 1), Schema::new("accounts", 1)),
        )
        .unwrap();
        assert!(schemas.current_schema(&db, "accounts").unwrap_err().is_not_found());

        schemas.create(&mut db, &Schema::new("accounts", 1)).unwrap();
        schemas.create(&mut db, &Schema::new("accounts", 2)).unwrap();
        assert!(!user.has(&db, &SchemaBucket::key("accounts", 2)).unwrap());
        assert!(db.has(b"_schema:accounts:\0\0\0\x02").unwrap());
    }
}
