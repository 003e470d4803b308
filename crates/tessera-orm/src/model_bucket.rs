//! Typed CRUD buckets

use crate::bucket::Bucket;
use crate::error::{OrmError, OrmResult};
use crate::model::{Model, SerialModel};
use crate::object::Obj;
use crate::sequence::Sequence;
use tessera_store::{CacheOverlay, KvStore, ReadOnlyKvStore};
use tracing::trace;

/// Name of the default key allocation sequence
pub const ID_SEQUENCE: &str = "id";

/// Bucket of models addressed by an external key.
///
/// Unlike [`Bucket`], reads of missing keys and deletes of missing keys fail
/// with `NotFound`.
pub struct ModelBucket<T> {
    bucket: Bucket<T>,
    id_seq: Sequence,
}

impl<T> Clone for ModelBucket<T> {
    fn clone(&self) -> Self {
        Self {
            bucket: self.bucket.clone(),
            id_seq: self.id_seq.clone(),
        }
    }
}

impl<T> std::fmt::Debug for ModelBucket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBucket")
            .field("bucket", &self.bucket)
            .field("id_seq", &self.id_seq)
            .finish()
    }
}

impl<T: Model> ModelBucket<T> {
    /// Create a model bucket. Panics on an invalid name, see [`Bucket::new`].
    pub fn new(name: &str) -> Self {
        let bucket = Bucket::new(name);
        let id_seq = bucket.sequence(ID_SEQUENCE);
        Self { bucket, id_seq }
    }

    /// Register a single-key index, see [`Bucket::with_index`]
    pub fn with_index<F>(self, name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Option<Vec<u8>>> + Send + Sync + 'static,
    {
        Self {
            bucket: self.bucket.with_index(name, indexer, unique),
            id_seq: self.id_seq,
        }
    }

    /// Register a multi-key index, see [`Bucket::with_multi_key_index`]
    pub fn with_multi_key_index<F>(self, name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Vec<Vec<u8>>> + Send + Sync + 'static,
    {
        Self {
            bucket: self.bucket.with_multi_key_index(name, indexer, unique),
            id_seq: self.id_seq,
        }
    }

    /// Allocate keys from another sequence of this bucket
    pub fn with_id_sequence(mut self, name: &str) -> Self {
        self.id_seq = self.bucket.sequence(name);
        self
    }

    /// Underlying bucket
    pub fn bucket(&self) -> &Bucket<T> {
        &self.bucket
    }

    /// Key allocation sequence
    pub fn id_sequence(&self) -> &Sequence {
        &self.id_seq
    }

    /// Store `model` under `key`, or under a freshly allocated key if `key`
    /// is empty. Returns the key used.
    pub fn put(&self, db: &mut dyn KvStore, key: &[u8], model: &T) -> OrmResult<Vec<u8>> {
        model.validate()?;

        let mut tx = CacheOverlay::new(&mut *db);
        let key = if key.is_empty() {
            let id = self.id_seq.next_val(&mut tx)?;
            trace!(bucket = %self.bucket.name(), id = %hex::encode(&id), "allocated key");
            id
        } else {
            key.to_vec()
        };
        self.bucket.save(&mut tx, &Obj::new(key.clone(), model.clone()))?;
        tx.write()?;
        Ok(key)
    }

    /// Load the model stored under `key`
    pub fn one(&self, db: &dyn ReadOnlyKvStore, key: &[u8]) -> OrmResult<T> {
        let raw = db
            .get(&self.bucket.db_key(key))?
            .ok_or_else(|| OrmError::not_found(key))?;
        self.decode(&raw)
    }

    /// Models referenced by one secondary key, with their keys. Empty when
    /// nothing matches.
    pub fn by_index(
        &self,
        db: &dyn ReadOnlyKvStore,
        index: &str,
        key: &[u8],
    ) -> OrmResult<Vec<(Vec<u8>, T)>> {
        let refs = self.bucket.index(index)?.get_at(db, key)?;
        refs.into_iter()
            .map(|pk| {
                let model = self.one(db, &pk)?;
                Ok((pk, model))
            })
            .collect()
    }

    /// Succeed if a model is stored under `key`, `NotFound` otherwise
    pub fn has(&self, db: &dyn ReadOnlyKvStore, key: &[u8]) -> OrmResult<()> {
        if key.is_empty() || !self.bucket.has(db, key)? {
            return Err(OrmError::not_found(key));
        }
        Ok(())
    }

    /// Delete the model stored under `key`, `NotFound` if there is none
    pub fn delete(&self, db: &mut dyn KvStore, key: &[u8]) -> OrmResult<()> {
        self.has(&*db, key)?;
        self.bucket.delete(db, key)
    }

    fn decode(&self, raw: &[u8]) -> OrmResult<T> {
        T::unmarshal(raw).map_err(|e| self.type_mismatch(e))
    }

    /// Report undecodable values as `TypeMismatch`, whatever read path hit them
    fn type_mismatch(&self, err: OrmError) -> OrmError {
        match err {
            OrmError::Deserialize(reason) => OrmError::TypeMismatch {
                bucket: self.bucket.name().to_string(),
                reason,
            },
            other => other,
        }
    }
}

/// Bucket of models that carry their own key.
///
/// Saving a model with an empty id allocates one from the bucket's id
/// sequence and writes it back into the model.
pub struct SerialModelBucket<T> {
    inner: ModelBucket<T>,
}

impl<T> Clone for SerialModelBucket<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for SerialModelBucket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialModelBucket")
            .field("inner", &self.inner)
            .finish()
    }
}

impl<T: SerialModel> SerialModelBucket<T> {
    /// Create a serial model bucket. Panics on an invalid name.
    pub fn new(name: &str) -> Self {
        Self {
            inner: ModelBucket::new(name),
        }
    }

    /// Register a single-key index
    pub fn with_index<F>(self, name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Option<Vec<u8>>> + Send + Sync + 'static,
    {
        Self {
            inner: self.inner.with_index(name, indexer, unique),
        }
    }

    /// Register a multi-key index
    pub fn with_multi_key_index<F>(self, name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Vec<Vec<u8>>> + Send + Sync + 'static,
    {
        Self {
            inner: self.inner.with_multi_key_index(name, indexer, unique),
        }
    }

    /// Allocate ids from another sequence of this bucket
    pub fn with_id_sequence(self, name: &str) -> Self {
        Self {
            inner: self.inner.with_id_sequence(name),
        }
    }

    /// Underlying bucket
    pub fn bucket(&self) -> &Bucket<T> {
        self.inner.bucket()
    }

    /// Store `model`, allocating an id first if it has none.
    ///
    /// The id is written back into `model` only once the save succeeded.
    pub fn save(&self, db: &mut dyn KvStore, model: &mut T) -> OrmResult<()> {
        let mut tx = CacheOverlay::new(&mut *db);
        let mut stored = model.clone();
        if stored.id().is_empty() {
            stored.set_id(self.inner.id_seq.next_val(&mut tx)?);
        }
        let key = stored.id().to_vec();
        self.inner.bucket.save(&mut tx, &Obj::new(key, stored.clone()))?;
        tx.write()?;

        *model = stored;
        Ok(())
    }

    /// Load the model with id `key`
    pub fn one(&self, db: &dyn ReadOnlyKvStore, key: &[u8]) -> OrmResult<T> {
        self.inner.one(db, key)
    }

    /// Models referenced by one secondary key
    pub fn by_index(&self, db: &dyn ReadOnlyKvStore, index: &str, key: &[u8]) -> OrmResult<Vec<T>> {
        Ok(self
            .inner
            .by_index(db, index, key)?
            .into_iter()
            .map(|(_, model)| model)
            .collect())
    }

    /// Succeed if a model with id `key` exists
    pub fn has(&self, db: &dyn ReadOnlyKvStore, key: &[u8]) -> OrmResult<()> {
        self.inner.has(db, key)
    }

    /// Delete the model with id `key`, `NotFound` if there is none
    pub fn delete(&self, db: &mut dyn KvStore, key: &[u8]) -> OrmResult<()> {
        self.inner.delete(db, key)
    }

    /// Iterate models whose id starts with `prefix`, in id order
    pub fn prefix_scan<'a>(
        &'a self,
        db: &'a dyn ReadOnlyKvStore,
        prefix: &[u8],
        reverse: bool,
    ) -> OrmResult<impl Iterator<Item = OrmResult<T>> + 'a> {
        Ok(self
            .bucket()
            .prefix_scan(db, prefix, reverse)?
            .map(move |obj| {
                obj.map(Obj::into_value)
                    .map_err(|e| self.inner.type_mismatch(e))
            }))
    }

    /// Iterate models in secondary key order for keys starting with `prefix`
    pub fn index_scan<'a>(
        &'a self,
        db: &'a dyn ReadOnlyKvStore,
        index: &str,
        prefix: &[u8],
        reverse: bool,
    ) -> OrmResult<impl Iterator<Item = OrmResult<T>> + 'a> {
        Ok(self
            .bucket()
            .index_scan(db, index, prefix, reverse)?
            .map(move |obj| {
                obj.map(Obj::into_value)
                    .map_err(|e| self.inner.type_mismatch(e))
            }))
    }
}
