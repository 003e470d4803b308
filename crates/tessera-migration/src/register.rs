//! Registry of per-type migration steps

use crate::error::{MigrationError, MigrationResult};
use crate::migratable::Migratable;
use crate::schema::SchemaBucket;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tessera_store::ReadOnlyKvStore;
use tracing::{debug, trace};

/// One migration step, bringing a payload from `version - 1` to `version`
pub type MigrationFn<M> =
    Arc<dyn Fn(&dyn ReadOnlyKvStore, &mut M) -> MigrationResult<()> + Send + Sync>;

/// Migration steps keyed by payload type and target version.
///
/// Built once at startup and shared through an `Arc` by every migrating
/// bucket and handler.
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: HashMap<(TypeId, u32), Box<dyn Any + Send + Sync>>,
    schemas: SchemaBucket,
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("migrations", &self.migrations.len())
            .finish()
    }
}

impl MigrationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the step migrating `M` payloads to `version`.
    ///
    /// Steps are registered in order starting at 1; each version may be
    /// registered once.
    pub fn register<M, F>(&mut self, version: u32, migration: F) -> MigrationResult<()>
    where
        M: Migratable + 'static,
        F: Fn(&dyn ReadOnlyKvStore, &mut M) -> MigrationResult<()> + Send + Sync + 'static,
    {
        if version == 0 {
            return Err(MigrationError::InvalidInput(format!(
                "{}: migration version must be at least 1",
                type_name::<M>()
            )));
        }
        if self.has_migration::<M>(version) {
            return Err(MigrationError::InvalidInput(format!(
                "{}: migration to version {} already registered",
                type_name::<M>(),
                version
            )));
        }
        if version > 1 && !self.has_migration::<M>(version - 1) {
            return Err(MigrationError::InvalidInput(format!(
                "{}: migration to version {} registered before version {}",
                type_name::<M>(),
                version,
                version - 1
            )));
        }

        let migration: MigrationFn<M> = Arc::new(migration);
        self.migrations
            .insert((TypeId::of::<M>(), version), Box::new(migration));
        debug!(payload = type_name::<M>(), version, "registered migration");
        Ok(())
    }

    /// Check if a step to `version` is registered for `M`
    pub fn has_migration<M: 'static>(&self, version: u32) -> bool {
        self.migrations.contains_key(&(TypeId::of::<M>(), version))
    }

    /// Highest version `M` can be migrated to, 0 if nothing is registered
    pub fn latest_version<M: 'static>(&self) -> u32 {
        let mut version = 0;
        while self.has_migration::<M>(version + 1) {
            version += 1;
        }
        version
    }

    fn migration<M: 'static>(&self, version: u32) -> Option<&MigrationFn<M>> {
        self.migrations
            .get(&(TypeId::of::<M>(), version))?
            .downcast_ref::<MigrationFn<M>>()
    }

    /// Migrate `payload` to schema `to`, then validate it.
    ///
    /// An untagged payload (schema 0) is tagged with `to` without running any
    /// step. A payload from a schema newer than `to` is rejected.
    pub fn apply<M>(&self, db: &dyn ReadOnlyKvStore, payload: &mut M, to: u32) -> MigrationResult<()>
    where
        M: Migratable + 'static,
    {
        if to == 0 {
            return Err(MigrationError::Schema(format!(
                "{}: cannot migrate to schema 0",
                type_name::<M>()
            )));
        }

        let from = payload.schema();
        if from == 0 {
            payload.set_schema(to);
        } else if from > to {
            return Err(MigrationError::Schema(format!(
                "{}: payload schema {} is newer than {}",
                type_name::<M>(),
                from,
                to
            )));
        }

        let start = payload.schema();
        for version in (start..to).map(|v| v + 1) {
            let step = self.migration::<M>(version).ok_or_else(|| {
                MigrationError::Schema(format!(
                    "{}: no migration to version {}",
                    type_name::<M>(),
                    version
                ))
            })?;
            step(db, payload)?;
            payload.set_schema(version);
            trace!(payload = type_name::<M>(), version, "migrated payload");
        }

        payload.validate()?;
        Ok(())
    }

    /// Current schema version of package `pkg`
    pub fn current_schema(&self, db: &dyn ReadOnlyKvStore, pkg: &str) -> MigrationResult<u32> {
        self.schemas.current_schema(db, pkg)
    }

    /// Migrate `payload` to the current schema of package `pkg`
    pub fn migrate<M>(&self, db: &dyn ReadOnlyKvStore, pkg: &str, payload: &mut M) -> MigrationResult<()>
    where
        M: Migratable + 'static,
    {
        let to = self.current_schema(db, pkg)?;
        self.apply(db, payload, to)
    }
}

/// Migration step that leaves the payload untouched
pub fn no_modification<M>(_db: &dyn ReadOnlyKvStore, _payload: &mut M) -> MigrationResult<()> {
    Ok(())
}

/// Migration step that always fails, for versions that cannot be upgraded
pub fn refuse_migration<M>(_db: &dyn ReadOnlyKvStore, payload: &mut M) -> MigrationResult<()>
where
    M: Migratable,
{
    Err(MigrationError::Schema(format!(
        "{}: migration from schema {} refused",
        type_name::<M>(),
        payload.schema()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migratable::Metadata;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tessera_orm::{OrmError, OrmResult, Validate};
    use tessera_store::MemStore;

    #[derive(Clone, Debug, PartialEq)]
    struct Note {
        metadata: Metadata,
        text: String,
    }

    impl Validate for Note {
        fn validate(&self) -> OrmResult<()> {
            self.metadata.validate()?;
            if self.text.contains('!') {
                return Err(OrmError::InvalidModel("no shouting".into()));
            }
            Ok(())
        }
    }

    impl Migratable for Note {
        fn schema(&self) -> u32 {
            self.metadata.schema
        }

        fn set_schema(&mut self, version: u32) {
            self.metadata.schema = version;
        }
    }

    fn note(schema: u32, text: &str) -> Note {
        Note {
            metadata: Metadata::new(schema),
            text: text.into(),
        }
    }

    fn appender(suffix: &'static str) -> impl Fn(&dyn ReadOnlyKvStore, &mut Note) -> MigrationResult<()> {
        move |_: &dyn ReadOnlyKvStore, n: &mut Note| {
            n.text.push_str(suffix);
            Ok(())
        }
    }

    fn registry() -> MigrationRegistry {
        let mut registry = MigrationRegistry::new();
        registry.register(1, no_modification::<Note>).unwrap();
        registry.register(2, appender("a")).unwrap();
        registry.register(3, appender("b")).unwrap();
        registry
    }

    // ==================== Registration Tests ====================

    #[test]
    fn test_register_rules() {
        let mut registry = MigrationRegistry::new();
        let err = registry.register(0, no_modification::<Note>).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidInput(_)));

        let err = registry.register(2, no_modification::<Note>).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidInput(_)));

        registry.register(1, no_modification::<Note>).unwrap();
        let err = registry.register(1, no_modification::<Note>).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidInput(_)));

        registry.register(2, no_modification::<Note>).unwrap();
        assert_eq!(registry.latest_version::<Note>(), 2);
        assert!(registry.has_migration::<Note>(2));
        assert!(!registry.has_migration::<Note>(3));
    }

    #[test]
    fn test_types_are_independent() {
        let mut registry = registry();
        registry.register(1, no_modification::<Metadata>).unwrap();
        assert_eq!(registry.latest_version::<Metadata>(), 1);
        assert_eq!(registry.latest_version::<Note>(), 3);
    }

    // ==================== Apply Tests ====================

    #[test]
    fn test_apply_sequential_steps() {
        let db = MemStore::new();
        let mut payload = note(1, "x");
        registry().apply(&db, &mut payload, 3).unwrap();
        assert_eq!(payload, note(3, "xab"));
    }

    #[test]
    fn test_apply_partial_target() {
        let db = MemStore::new();
        let mut payload = note(1, "x");
        registry().apply(&db, &mut payload, 2).unwrap();
        assert_eq!(payload, note(2, "xa"));
    }

    #[test]
    fn test_apply_untagged_payload() {
        let db = MemStore::new();
        let mut payload = note(0, "x");
        registry().apply(&db, &mut payload, 3).unwrap();
        assert_eq!(payload, note(3, "x"));
    }

    #[test]
    fn test_apply_rejects_future_schema() {
        let db = MemStore::new();
        let mut payload = note(4, "x");
        let err = registry().apply(&db, &mut payload, 3).unwrap_err();
        assert!(err.is_schema());
        assert_eq!(payload, note(4, "x"));
    }

    #[test]
    fn test_apply_missing_step() {
        let db = MemStore::new();
        let mut payload = note(1, "x");
        let err = registry().apply(&db, &mut payload, 5).unwrap_err();
        assert!(err.is_schema());
    }

    #[test]
    fn test_apply_to_zero() {
        let db = MemStore::new();
        let mut payload = note(1, "x");
        assert!(registry().apply(&db, &mut payload, 0).unwrap_err().is_schema());
    }

    #[test]
    fn test_apply_validates_result() {
        let db = MemStore::new();
        let mut registry = MigrationRegistry::new();
        registry.register(1, no_modification::<Note>).unwrap();
        registry.register(2, appender("!")).unwrap();

        let err = registry.apply(&db, &mut note(1, "x"), 2).unwrap_err();
        assert!(matches!(err, MigrationError::Orm(OrmError::InvalidModel(_))));
    }

    #[test]
    fn test_refuse_migration() {
        let db = MemStore::new();
        let mut registry = MigrationRegistry::new();
        registry.register(1, no_modification::<Note>).unwrap();
        registry.register(2, refuse_migration::<Note>).unwrap();

        let mut payload = note(1, "x");
        assert!(registry.apply(&db, &mut payload, 2).unwrap_err().is_schema());
        assert_eq!(payload.schema(), 1);
    }

    #[test]
    fn test_apply_current_schema_runs_nothing() {
        let db = MemStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = MigrationRegistry::new();
        let counter = Arc::clone(&calls);
        registry
            .register(1, move |_: &dyn ReadOnlyKvStore, _: &mut Note| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let mut payload = note(1, "x");
        registry.apply(&db, &mut payload, 1).unwrap();
        assert_eq!(payload, note(1, "x"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
