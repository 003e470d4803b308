//! Buckets that keep stored records at their package's current schema

use crate::error::MigrationResult;
use crate::migratable::Migratable;
use crate::register::MigrationRegistry;
use std::sync::Arc;
use tessera_orm::{is_valid_name, Bucket, Model, ModelBucket, Obj, OrmResult, SerialModel, SerialModelBucket};
use tessera_store::{KvStore, ReadOnlyKvStore};

/// Migrates payloads of one package to its current schema
#[derive(Clone, Debug)]
struct Migrator {
    pkg: String,
    registry: Arc<MigrationRegistry>,
}

impl Migrator {
    fn new(pkg: &str, registry: Arc<MigrationRegistry>) -> Self {
        assert!(is_valid_name(pkg), "invalid package name: {pkg:?}");
        Self {
            pkg: pkg.to_string(),
            registry,
        }
    }

    fn target(&self, db: &dyn ReadOnlyKvStore) -> MigrationResult<u32> {
        self.registry.current_schema(db, &self.pkg)
    }

    fn migrate<M: Migratable + 'static>(&self, db: &dyn ReadOnlyKvStore, payload: &mut M) -> MigrationResult<()> {
        let to = self.target(db)?;
        self.registry.apply(db, payload, to)
    }
}

/// [`Bucket`] migrating every record it reads or writes.
///
/// Reads return records upgraded in memory; the stored bytes are only
/// rewritten on the next save. Writes of records from a newer schema fail.
pub struct MigratingBucket<T> {
    bucket: Bucket<T>,
    migrator: Migrator,
}

impl<T> std::fmt::Debug for MigratingBucket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigratingBucket")
            .field("bucket", &self.bucket)
            .field("pkg", &self.migrator.pkg)
            .finish()
    }
}

impl<T: Model + Migratable + 'static> MigratingBucket<T> {
    /// Create a bucket whose records follow the schema of package `pkg`.
    ///
    /// # Panics
    ///
    /// Panics if `name` or `pkg` is not a valid name.
    pub fn new(name: &str, pkg: &str, registry: Arc<MigrationRegistry>) -> Self {
        Self {
            bucket: Bucket::new(name),
            migrator: Migrator::new(pkg, registry),
        }
    }

    /// Register a single-key index
    pub fn with_index<F>(self, name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Option<Vec<u8>>> + Send + Sync + 'static,
    {
        Self {
            bucket: self.bucket.with_index(name, indexer, unique),
            migrator: self.migrator,
        }
    }

    /// Register a multi-key index
    pub fn with_multi_key_index<F>(self, name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Vec<Vec<u8>>> + Send + Sync + 'static,
    {
        Self {
            bucket: self.bucket.with_multi_key_index(name, indexer, unique),
            migrator: self.migrator,
        }
    }

    /// Underlying bucket, without migration
    pub fn bucket(&self) -> &Bucket<T> {
        &self.bucket
    }

    /// Load and migrate an object, `None` if absent
    pub fn get(&self, db: &dyn ReadOnlyKvStore, key: &[u8]) -> MigrationResult<Option<Obj<T>>> {
        match self.bucket.get(db, key)? {
            Some(mut obj) => {
                self.migrator.migrate(db, obj.value_mut())?;
                Ok(Some(obj))
            }
            None => Ok(None),
        }
    }

    /// Check if an object is stored under `key`
    pub fn has(&self, db: &dyn ReadOnlyKvStore, key: &[u8]) -> MigrationResult<bool> {
        Ok(self.bucket.has(db, key)?)
    }

    /// Migrate `obj` in place, then store it
    pub fn save(&self, db: &mut dyn KvStore, obj: &mut Obj<T>) -> MigrationResult<()> {
        self.migrator.migrate(&*db, obj.value_mut())?;
        Ok(self.bucket.save(db, obj)?)
    }

    /// Delete an object. Deleting a missing key is not an error.
    pub fn delete(&self, db: &mut dyn KvStore, key: &[u8]) -> MigrationResult<()> {
        Ok(self.bucket.delete(db, key)?)
    }

    /// Objects referenced by one secondary key, migrated
    pub fn get_indexed(
        &self,
        db: &dyn ReadOnlyKvStore,
        index: &str,
        key: &[u8],
    ) -> MigrationResult<Vec<Obj<T>>> {
        let to = self.migrator.target(db)?;
        self.bucket
            .get_indexed(db, index, key)?
            .into_iter()
            .map(|mut obj| -> MigrationResult<Obj<T>> {
                self.migrator.registry.apply(db, obj.value_mut(), to)?;
                Ok(obj)
            })
            .collect()
    }

    /// Iterate migrated objects whose key starts with `prefix`
    pub fn prefix_scan<'a>(
        &'a self,
        db: &'a dyn ReadOnlyKvStore,
        prefix: &[u8],
        reverse: bool,
    ) -> MigrationResult<impl Iterator<Item = MigrationResult<Obj<T>>> + 'a> {
        let to = self.migrator.target(db)?;
        let registry = &self.migrator.registry;
        Ok(self
            .bucket
            .prefix_scan(db, prefix, reverse)?
            .map(move |obj| -> MigrationResult<Obj<T>> {
                let mut obj = obj?;
                registry.apply(db, obj.value_mut(), to)?;
                Ok(obj)
            }))
    }

    /// Iterate migrated objects in secondary key order
    pub fn index_scan<'a>(
        &'a self,
        db: &'a dyn ReadOnlyKvStore,
        index: &str,
        prefix: &[u8],
        reverse: bool,
    ) -> MigrationResult<impl Iterator<Item = MigrationResult<Obj<T>>> + 'a> {
        let to = self.migrator.target(db)?;
        let registry = &self.migrator.registry;
        Ok(self
            .bucket
            .index_scan(db, index, prefix, reverse)?
            .map(move |obj| -> MigrationResult<Obj<T>> {
                let mut obj = obj?;
                registry.apply(db, obj.value_mut(), to)?;
                Ok(obj)
            }))
    }
}

/// [`ModelBucket`] migrating every model it reads or writes
pub struct MigratingModelBucket<T> {
    inner: ModelBucket<T>,
    migrator: Migrator,
}

impl<T> std::fmt::Debug for MigratingModelBucket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigratingModelBucket")
            .field("inner", &self.inner)
            .field("pkg", &self.migrator.pkg)
            .finish()
    }
}

impl<T: Model + Migratable + 'static> MigratingModelBucket<T> {
    /// Create a model bucket whose records follow the schema of package `pkg`
    pub fn new(name: &str, pkg: &str, registry: Arc<MigrationRegistry>) -> Self {
        Self {
            inner: ModelBucket::new(name),
            migrator: Migrator::new(pkg, registry),
        }
    }

    /// Register a single-key index
    pub fn with_index<F>(self, name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Option<Vec<u8>>> + Send + Sync + 'static,
    {
        Self {
            inner: self.inner.with_index(name, indexer, unique),
            migrator: self.migrator,
        }
    }

    /// Register a multi-key index
    pub fn with_multi_key_index<F>(self, name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Vec<Vec<u8>>> + Send + Sync + 'static,
    {
        Self {
            inner: self.inner.with_multi_key_index(name, indexer, unique),
            migrator: self.migrator,
        }
    }

    /// Allocate keys from another sequence of this bucket
    pub fn with_id_sequence(self, name: &str) -> Self {
        Self {
            inner: self.inner.with_id_sequence(name),
            migrator: self.migrator,
        }
    }

    /// Underlying model bucket, without migration
    pub fn inner(&self) -> &ModelBucket<T> {
        &self.inner
    }

    /// Migrate `model` in place, then store it. Returns the key used.
    pub fn put(&self, db: &mut dyn KvStore, key: &[u8], model: &mut T) -> MigrationResult<Vec<u8>> {
        self.migrator.migrate(&*db, model)?;
        Ok(self.inner.put(db, key, model)?)
    }

    /// Load and migrate the model stored under `key`
    pub fn one(&self, db: &dyn ReadOnlyKvStore, key: &[u8]) -> MigrationResult<T> {
        let mut model = self.inner.one(db, key)?;
        self.migrator.migrate(db, &mut model)?;
        Ok(model)
    }

    /// Migrated models referenced by one secondary key
    pub fn by_index(
        &self,
        db: &dyn ReadOnlyKvStore,
        index: &str,
        key: &[u8],
    ) -> MigrationResult<Vec<(Vec<u8>, T)>> {
        let to = self.migrator.target(db)?;
        self.inner
            .by_index(db, index, key)?
            .into_iter()
            .map(|(key, mut model)| -> MigrationResult<(Vec<u8>, T)> {
                self.migrator.registry.apply(db, &mut model, to)?;
                Ok((key, model))
            })
            .collect()
    }

    /// Succeed if a model is stored under `key`
    pub fn has(&self, db: &dyn ReadOnlyKvStore, key: &[u8]) -> MigrationResult<()> {
        Ok(self.inner.has(db, key)?)
    }

    /// Delete the model stored under `key`, `NotFound` if there is none
    pub fn delete(&self, db: &mut dyn KvStore, key: &[u8]) -> MigrationResult<()> {
        Ok(self.inner.delete(db, key)?)
    }
}

/// [`SerialModelBucket`] migrating every model it reads or writes
pub struct MigratingSerialModelBucket<T> {
    inner: SerialModelBucket<T>,
    migrator: Migrator,
}

impl<T> std::fmt::Debug for MigratingSerialModelBucket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigratingSerialModelBucket")
            .field("inner", &self.inner)
            .field("pkg", &self.migrator.pkg)
            .finish()
    }
}

impl<T: SerialModel + Migratable + 'static> MigratingSerialModelBucket<T> {
    /// Create a serial model bucket whose records follow the schema of
    /// package `pkg`
    pub fn new(name: &str, pkg: &str, registry: Arc<MigrationRegistry>) -> Self {
        Self {
            inner: SerialModelBucket::new(name),
            migrator: Migrator::new(pkg, registry),
        }
    }

    /// Register a single-key index
    pub fn with_index<F>(self, name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Option<Vec<u8>>> + Send + Sync + 'static,
    {
        Self {
            inner: self.inner.with_index(name, indexer, unique),
            migrator: self.migrator,
        }
    }

    /// Register a multi-key index
    pub fn with_multi_key_index<F>(self, name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Vec<Vec<u8>>> + Send + Sync + 'static,
    {
        Self {
            inner: self.inner.with_multi_key_index(name, indexer, unique),
            migrator: self.migrator,
        }
    }

    /// Underlying serial model bucket, without migration
    pub fn inner(&self) -> &SerialModelBucket<T> {
        &self.inner
    }

    /// Migrate `model` in place, then store it, allocating an id if needed
    pub fn save(&self, db: &mut dyn KvStore, model: &mut T) -> MigrationResult<()> {
        self.migrator.migrate(&*db, model)?;
        Ok(self.inner.save(db, model)?)
    }

    /// Load and migrate the model with id `key`
    pub fn one(&self, db: &dyn ReadOnlyKvStore, key: &[u8]) -> MigrationResult<T> {
        let mut model = self.inner.one(db, key)?;
        self.migrator.migrate(db, &mut model)?;
        Ok(model)
    }

    /// Migrated models referenced by one secondary key
    pub fn by_index(&self, db: &dyn ReadOnlyKvStore, index: &str, key: &[u8]) -> MigrationResult<Vec<T>> {
        let to = self.migrator.target(db)?;
        self.inner
            .by_index(db, index, key)?
            .into_iter()
            .map(|mut model| -> MigrationResult<T> {
                self.migrator.registry.apply(db, &mut model, to)?;
                Ok(model)
            })
            .collect()
    }

    /// Succeed if a model with id `key` exists
    pub fn has(&self, db: &dyn ReadOnlyKvStore, key: &[u8]) -> MigrationResult<()> {
        Ok(self.inner.has(db, key)?)
    }

    /// Delete the model with id `key`, `NotFound` if there is none
    pub fn delete(&self, db: &mut dyn KvStore, key: &[u8]) -> MigrationResult<()> {
        Ok(self.inner.delete(db, key)?)
    }

    /// Iterate migrated models whose id starts with `prefix`.
    ///
    /// The target schema is read once when the scan starts and each model is
    /// migrated as it is loaded.
    pub fn prefix_scan<'a>(
        &'a self,
        db: &'a dyn ReadOnlyKvStore,
        prefix: &[u8],
        reverse: bool,
    ) -> MigrationResult<impl Iterator<Item = MigrationResult<T>> + 'a> {
        let to = self.migrator.target(db)?;
        let registry = &self.migrator.registry;
        Ok(self
            .inner
            .prefix_scan(db, prefix, reverse)?
            .map(move |model| -> MigrationResult<T> {
                let mut model = model?;
                registry.apply(db, &mut model, to)?;
                Ok(model)
            }))
    }

    /// Iterate migrated models in secondary key order
    pub fn index_scan<'a>(
        &'a self,
        db: &'a dyn ReadOnlyKvStore,
        index: &str,
        prefix: &[u8],
        reverse: bool,
    ) -> MigrationResult<impl Iterator<Item = MigrationResult<T>> + 'a> {
        let to = self.migrator.target(db)?;
        let registry = &self.migrator.registry;
        Ok(self
            .inner
            .index_scan(db, index, prefix, reverse)?
            .map(move |model| -> MigrationResult<T> {
                let mut model = model?;
                registry.apply(db, &mut model, to)?;
                Ok(model)
            }))
    }
}
