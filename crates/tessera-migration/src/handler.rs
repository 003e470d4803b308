//! Message handlers that see payloads at their current schema

use crate::error::{MigrationError, MigrationResult};
use crate::migratable::{Metadata, Migratable};
use crate::register::MigrationRegistry;
use crate::schema::{Schema, SchemaBucket};
use std::sync::Arc;
use tessera_orm::{is_valid_name, OrmError, OrmResult, Validate};
use tessera_store::{KvStore, ReadOnlyKvStore};

/// Processes messages of type `M`.
///
/// `check` runs against a read-only view and must not have side effects;
/// `deliver` may write.
pub trait Handler<M> {
    /// Result of a successful check or delivery
    type Output;
    /// Handler error, able to carry migration failures
    type Error: From<MigrationError>;

    /// Validate a message without applying it
    fn check(&self, db: &dyn ReadOnlyKvStore, msg: &M) -> Result<Self::Output, Self::Error>;

    /// Apply a message
    fn deliver(&self, db: &mut dyn KvStore, msg: &M) -> Result<Self::Output, Self::Error>;
}

/// Migrates each message to its package's current schema before passing it
/// to the wrapped handler
#[derive(Debug)]
pub struct SchemaMigratingHandler<H> {
    inner: H,
    pkg: String,
    registry: Arc<MigrationRegistry>,
}

impl<H> SchemaMigratingHandler<H> {
    /// Wrap `inner`.
    ///
    /// # Panics
    ///
    /// Panics if `pkg` is not a valid package name.
    pub fn new(inner: H, pkg: &str, registry: Arc<MigrationRegistry>) -> Self {
        assert!(is_valid_name(pkg), "invalid package name: {pkg:?}");
        Self {
            inner,
            pkg: pkg.to_string(),
            registry,
        }
    }

    /// Wrapped handler
    pub fn inner(&self) -> &H {
        &self.inner
    }
}

impl<M, H> Handler<M> for SchemaMigratingHandler<H>
where
    M: Migratable + Clone + 'static,
    H: Handler<M>,
{
    type Output = H::Output;
    type Error = H::Error;

    fn check(&self, db: &dyn ReadOnlyKvStore, msg: &M) -> Result<Self::Output, Self::Error> {
        let mut msg = msg.clone();
        self.registry.migrate(db, &self.pkg, &mut msg)?;
        self.inner.check(db, &msg)
    }

    fn deliver(&self, db: &mut dyn KvStore, msg: &M) -> Result<Self::Output, Self::Error> {
        let mut msg = msg.clone();
        self.registry.migrate(&*db, &self.pkg, &mut msg)?;
        self.inner.deliver(db, &msg)
    }
}

/// Dispatches each message to the handler registered for its schema
/// version; `handlers[0]` serves version 1
#[derive(Debug)]
pub struct SchemaRoutingHandler<H> {
    handlers: Vec<H>,
}

impl<H> SchemaRoutingHandler<H> {
    /// Route versions `1..=handlers.len()`
    pub fn new(handlers: Vec<H>) -> Self {
        Self { handlers }
    }

    fn route<M: Migratable>(&self, msg: &M) -> MigrationResult<&H> {
        let version = msg.schema();
        version
            .checked_sub(1)
            .and_then(|i| self.handlers.get(i as usize))
            .ok_or_else(|| {
                MigrationError::Schema(format!("no handler for schema version {version}"))
            })
    }
}

impl<M, H> Handler<M> for SchemaRoutingHandler<H>
where
    M: Migratable,
    H: Handler<M>,
{
    type Output = H::Output;
    type Error = H::Error;

    fn check(&self, db: &dyn ReadOnlyKvStore, msg: &M) -> Result<Self::Output, Self::Error> {
        self.route(msg)?.check(db, msg)
    }

    fn deliver(&self, db: &mut dyn KvStore, msg: &M) -> Result<Self::Output, Self::Error> {
        self.route(msg)?.deliver(db, msg)
    }
}

/// Request to register the next schema version of a package
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeSchemaMsg {
    /// Schema tag of the message itself
    pub metadata: Metadata,
    /// Package to upgrade
    pub pkg: String,
    /// Version to register
    pub to_version: u32,
}

impl Validate for UpgradeSchemaMsg {
    fn validate(&self) -> OrmResult<()> {
        self.metadata.validate()?;
        if !is_valid_name(&self.pkg) {
            return Err(OrmError::InvalidModel(format!(
                "invalid package name: {:?}",
                self.pkg
            )));
        }
        if self.to_version == 0 {
            return Err(OrmError::InvalidModel("target version must be at least 1".into()));
        }
        Ok(())
    }
}

impl Migratable for UpgradeSchemaMsg {
    fn schema(&self) -> u32 {
        self.metadata.schema
    }

    fn set_schema(&mut self, version: u32) {
        self.metadata.schema = version;
    }
}

/// Registers schema upgrades, one sequential version at a time
#[derive(Clone, Debug, Default)]
pub struct SchemaUpgradeHandler {
    schemas: SchemaBucket,
}

impl SchemaUpgradeHandler {
    /// Create a handler
    pub fn new() -> Self {
        Self::default()
    }
}

impl Handler<UpgradeSchemaMsg> for SchemaUpgradeHandler {
    type Output = Schema;
    type Error = MigrationError;

    fn check(&self, db: &dyn ReadOnlyKvStore, msg: &UpgradeSchemaMsg) -> MigrationResult<Schema> {
        msg.validate()?;
        let current = self.schemas.current_or_zero(db, &msg.pkg)?;
        if Some(msg.to_version) != current.checked_add(1) {
            return Err(MigrationError::InvalidInput(format!(
                "package {} is at schema {}, cannot upgrade to {}",
                msg.pkg, current, msg.to_version
            )));
        }
        Ok(Schema::new(msg.pkg.clone(), msg.to_version))
    }

    fn deliver(&self, db: &mut dyn KvStore, msg: &UpgradeSchemaMsg) -> MigrationResult<Schema> {
        let schema = self.check(&*db, msg)?;
        self.schemas.create(db, &schema)?;
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::no_modification;
    use tessera_store::MemStore;

    #[derive(Clone, Debug, PartialEq)]
    struct Greeting {
        metadata: Metadata,
        text: String,
    }

    impl Validate for Greeting {
        fn validate(&self) -> OrmResult<()> {
            self.metadata.validate()
        }
    }

    impl Migratable for Greeting {
        fn schema(&self) -> u32 {
            self.metadata.schema
        }

        fn set_schema(&mut self, version: u32) {
            self.metadata.schema = version;
        }
    }

    fn greeting(schema: u32, text: &str) -> Greeting {
        Greeting {
            metadata: Metadata::new(schema),
            text: text.into(),
        }
    }

    /// Returns what it was given
    struct Echo;

    impl Handler<Greeting> for Echo {
        type Output = Greeting;
        type Error = MigrationError;

        fn check(&self, _db: &dyn ReadOnlyKvStore, msg: &Greeting) -> MigrationResult<Greeting> {
            Ok(msg.clone())
        }

        fn deliver(&self, _db: &mut dyn KvStore, msg: &Greeting) -> MigrationResult<Greeting> {
            Ok(msg.clone())
        }
    }

    /// Prefixes messages with a fixed tag
    struct Tagged(&'static str);

    impl Handler<Greeting> for Tagged {
        type Output = String;
        type Error = MigrationError;

        fn check(&self, _db: &dyn ReadOnlyKvStore, msg: &Greeting) -> MigrationResult<String> {
            Ok(format!("{}:{}", self.0, msg.text))
        }

        fn deliver(&self, db: &mut dyn KvStore, msg: &Greeting) -> MigrationResult<String> {
            self.check(&*db, msg)
        }
    }

    fn upgrade(pkg: &str, to_version: u32) -> UpgradeSchemaMsg {
        UpgradeSchemaMsg {
            metadata: Metadata::new(1),
            pkg: pkg.into(),
            to_version,
        }
    }

    // ==================== Migrating Handler Tests ====================

    #[test]
    fn test_migrating_handler_sees_current_schema() {
        let mut db = MemStore::new();
        let upgrades = SchemaUpgradeHandler::new();
        upgrades.deliver(&mut db, &upgrade("greetings", 1)).unwrap();
        upgrades.deliver(&mut db, &upgrade("greetings", 2)).unwrap();

        let mut registry = MigrationRegistry::new();
        registry.register(1, no_modification::<Greeting>).unwrap();
        registry
            .register(2, |_: &dyn ReadOnlyKvStore, g: &mut Greeting| {
                g.text.push('!');
                Ok(())
            })
            .unwrap();
        let handler = SchemaMigratingHandler::new(Echo, "greetings", Arc::new(registry));

        let msg = greeting(1, "hi");
        assert_eq!(handler.check(&db, &msg).unwrap(), greeting(2, "hi!"));
        assert_eq!(handler.deliver(&mut db, &msg).unwrap(), greeting(2, "hi!"));
        // The caller's message is left alone
        assert_eq!(msg, greeting(1, "hi"));

        assert!(handler.check(&db, &greeting(3, "hi")).unwrap_err().is_schema());
    }

    // ==================== Routing Handler Tests ====================

    #[test]
    fn test_routing_by_schema() {
        let mut db = MemStore::new();
        let router = SchemaRoutingHandler::new(vec![Tagged("v1"), Tagged("v2")]);

        assert_eq!(router.check(&db, &greeting(1, "a")).unwrap(), "v1:a");
        assert_eq!(router.deliver(&mut db, &greeting(2, "b")).unwrap(), "v2:b");
        assert!(router.check(&db, &greeting(0, "c")).unwrap_err().is_schema());
        assert!(router.check(&db, &greeting(3, "c")).unwrap_err().is_schema());
    }

    // ==================== Upgrade Handler Tests ====================

    #[test]
    fn test_upgrade_must_be_sequential() {
        let mut db = MemStore::new();
        let handler = SchemaUpgradeHandler::new();

        let err = handler.check(&db, &upgrade("greetings", 2)).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidInput(_)));

        let schema = handler.deliver(&mut db, &upgrade("greetings", 1)).unwrap();
        assert_eq!(schema, Schema::new("greetings", 1));
        assert!(handler.deliver(&mut db, &upgrade("greetings", 1)).is_err());
        assert_eq!(
            SchemaBucket::new().current_schema(&db, "greetings").unwrap(),
            1
        );
    }

    #[test]
    fn test_upgrade_check_has_no_effect() {
        let db = MemStore::new();
        SchemaUpgradeHandler::new()
            .check(&db, &upgrade("greetings", 1))
            .unwrap();
        assert!(db.is_empty());
    }

    #[test]
    fn test_upgrade_rejects_invalid_message() {
        let db = MemStore::new();
        let handler = SchemaUpgradeHandler::new();
        assert!(handler.check(&db, &upgrade("Bad", 1)).is_err());
        assert!(handler.check(&db, &upgrade("greetings", 0)).is_err());

        let mut untagged = upgrade("greetings", 1);
        untagged.metadata = Metadata::default();
        assert!(handler.check(&db, &untagged).is_err());
    }
}
