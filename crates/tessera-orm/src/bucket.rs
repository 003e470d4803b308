//! Namespaced collections of objects with secondary indexes

use crate::error::{OrmError, OrmResult};
use crate::index::{Index, IndexRefs};
use crate::model::Model;
use crate::object::Obj;
use crate::sequence::Sequence;
use std::collections::BTreeMap;
use tessera_store::{prefix_range, CacheOverlay, KvIterator, KvStore, ReadOnlyKvStore};
use tracing::trace;

/// Shortest accepted bucket or index name
pub const MIN_NAME_LEN: usize = 3;
/// Longest accepted bucket or index name
pub const MAX_NAME_LEN: usize = 32;

/// Check a bucket or index name.
///
/// Names are 3 to 32 characters of `[a-z0-9_]` starting with a letter, so
/// they never contain the `:` separator and never clash with the `_i:` and
/// `_s.` internal prefixes.
pub fn is_valid_name(name: &str) -> bool {
    (MIN_NAME_LEN..=MAX_NAME_LEN).contains(&name.len())
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Objects of one model type stored under `<name>:<key>`.
///
/// Every registered index is updated together with the primary record: a
/// save or delete either lands completely or leaves the store untouched.
/// Index entries and sequences are scoped to the bucket, so buckets never
/// read or write each other's keys.
pub struct Bucket<T> {
    name: String,
    namespace: String,
    prefix: Vec<u8>,
    indexes: BTreeMap<String, Index<T>>,
}

impl<T> Clone for Bucket<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            prefix: self.prefix.clone(),
            indexes: self.indexes.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Bucket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("indexes", &self.indexes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: Model> Bucket<T> {
    /// Create a bucket.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not a valid bucket name.
    pub fn new(name: &str) -> Self {
        assert!(is_valid_name(name), "invalid bucket name: {name:?}");
        Self::with_namespace(name, name.to_string())
    }

    /// Create a bucket stored under `_<name>:<key>`.
    ///
    /// Valid names start with a letter, so no bucket created with
    /// [`Bucket::new`] can reach this keyspace. Used for engine bookkeeping
    /// such as schema versions.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not a valid bucket name.
    pub fn reserved(name: &str) -> Self {
        assert!(is_valid_name(name), "invalid bucket name: {name:?}");
        Self::with_namespace(name, format!("_{name}"))
    }

    fn with_namespace(name: &str, namespace: String) -> Self {
        Self {
            name: name.to_string(),
            prefix: format!("{namespace}:").into_bytes(),
            namespace,
            indexes: BTreeMap::new(),
        }
    }

    /// Register an index producing at most one secondary key per object.
    ///
    /// # Panics
    ///
    /// Panics on an invalid or already registered index name.
    pub fn with_index<F>(self, name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Option<Vec<u8>>> + Send + Sync + 'static,
    {
        self.register(Index::new(name, indexer, unique))
    }

    /// Register an index producing any number of secondary keys per object.
    ///
    /// # Panics
    ///
    /// Panics on an invalid or already registered index name.
    pub fn with_multi_key_index<F>(self, name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Vec<Vec<u8>>> + Send + Sync + 'static,
    {
        self.register(Index::new_multi_key(name, indexer, unique))
    }

    fn register(mut self, index: Index<T>) -> Self {
        let name = index.name().to_string();
        assert!(is_valid_name(&name), "invalid index name: {name:?}");
        assert!(
            !self.indexes.contains_key(&name),
            "index {name:?} registered twice on bucket {:?}",
            self.name
        );
        let index = index.scoped(&self.namespace);
        self.indexes.insert(name, index);
        self
    }

    /// Bucket name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key prefix, `<name>:`
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Storage key for a primary key
    pub fn db_key(&self, key: &[u8]) -> Vec<u8> {
        let mut db_key = Vec::with_capacity(self.prefix.len() + key.len());
        db_key.extend_from_slice(&self.prefix);
        db_key.extend_from_slice(key);
        db_key
    }

    /// Primary key of a storage key
    pub fn strip_prefix<'k>(&self, db_key: &'k [u8]) -> OrmResult<&'k [u8]> {
        db_key.strip_prefix(self.prefix.as_slice()).ok_or_else(|| {
            OrmError::Database(format!(
                "key {} is outside bucket {}",
                hex::encode(db_key),
                self.name
            ))
        })
    }

    /// Rebuild an object from a raw storage entry
    pub fn parse(&self, db_key: &[u8], value: &[u8]) -> OrmResult<Obj<T>> {
        let key = self.strip_prefix(db_key)?;
        Ok(Obj::new(key, T::unmarshal(value)?))
    }

    /// Load an object, `None` if absent
    pub fn get(&self, db: &dyn ReadOnlyKvStore, key: &[u8]) -> OrmResult<Option<Obj<T>>> {
        match db.get(&self.db_key(key))? {
            Some(raw) => Ok(Some(Obj::new(key, T::unmarshal(&raw)?))),
            None => Ok(None),
        }
    }

    /// Check if an object is stored under `key`
    pub fn has(&self, db: &dyn ReadOnlyKvStore, key: &[u8]) -> OrmResult<bool> {
        Ok(db.has(&self.db_key(key))?)
    }

    /// Validate and store an object, updating every index
    pub fn save(&self, db: &mut dyn KvStore, obj: &Obj<T>) -> OrmResult<()> {
        obj.validate()?;
        let prev = self.get(&*db, obj.key())?;

        let mut tx = CacheOverlay::new(&mut *db);
        for index in self.indexes.values() {
            index.update(&mut tx, prev.as_ref(), Some(obj))?;
        }
        tx.set(self.db_key(obj.key()), obj.value().marshal()?)?;
        tx.write()?;

        trace!(bucket = %self.name, key = %hex::encode(obj.key()), "saved object");
        Ok(())
    }

    /// Delete an object and its index entries. Deleting a missing key is not
    /// an error.
    pub fn delete(&self, db: &mut dyn KvStore, key: &[u8]) -> OrmResult<()> {
        let Some(existing) = self.get(&*db, key)? else {
            return Ok(());
        };

        let mut tx = CacheOverlay::new(&mut *db);
        for index in self.indexes.values() {
            index.update(&mut tx, Some(&existing), None)?;
        }
        tx.delete(&self.db_key(key))?;
        tx.write()?;

        trace!(bucket = %self.name, key = %hex::encode(key), "deleted object");
        Ok(())
    }

    /// Sequence scoped to this bucket
    pub fn sequence(&self, name: &str) -> Sequence {
        Sequence::new(&self.namespace, name)
    }

    /// Look up a registered index
    pub fn index(&self, name: &str) -> OrmResult<&Index<T>> {
        self.indexes
            .get(name)
            .ok_or_else(|| OrmError::UnknownIndex(format!("{} on bucket {}", name, self.name)))
    }

    /// Registered indexes in name order
    pub fn indexes(&self) -> impl Iterator<Item = &Index<T>> {
        self.indexes.values()
    }

    /// Objects referenced by one secondary key
    pub fn get_indexed(
        &self,
        db: &dyn ReadOnlyKvStore,
        index: &str,
        key: &[u8],
    ) -> OrmResult<Vec<Obj<T>>> {
        let refs = self.index(index)?.get_at(db, key)?;
        self.load_all(db, refs)
    }

    /// Objects sharing any secondary key with `pattern`
    pub fn get_indexed_like(
        &self,
        db: &dyn ReadOnlyKvStore,
        index: &str,
        pattern: &Obj<T>,
    ) -> OrmResult<Vec<Obj<T>>> {
        let refs = self.index(index)?.get_like(db, pattern)?;
        self.load_all(db, refs)
    }

    /// Iterate objects whose primary key starts with `prefix`
    pub fn prefix_scan<'a>(
        &'a self,
        db: &'a dyn ReadOnlyKvStore,
        prefix: &[u8],
        reverse: bool,
    ) -> OrmResult<ObjIter<'a, T>> {
        let (start, end) = prefix_range(&self.db_key(prefix));
        let inner = if reverse {
            db.reverse_iterator(start.as_deref(), end.as_deref())?
        } else {
            db.iterator(start.as_deref(), end.as_deref())?
        };
        Ok(ObjIter {
            bucket: self,
            inner,
        })
    }

    /// Iterate objects in secondary key order for keys starting with `prefix`
    pub fn index_scan<'a>(
        &'a self,
        db: &'a dyn ReadOnlyKvStore,
        index: &str,
        prefix: &[u8],
        reverse: bool,
    ) -> OrmResult<IndexedObjIter<'a, T>> {
        let refs = self.index(index)?.scan(db, prefix, reverse)?;
        Ok(IndexedObjIter {
            bucket: self,
            db,
            refs,
        })
    }

    /// Load an object an index points at
    pub(crate) fn load_ref(&self, db: &dyn ReadOnlyKvStore, key: &[u8]) -> OrmResult<Obj<T>> {
        self.get(db, key)?.ok_or_else(|| {
            OrmError::Database(format!(
                "index in bucket {} references missing key {}",
                self.name,
                hex::encode(key)
            ))
        })
    }

    fn load_all(&self, db: &dyn ReadOnlyKvStore, refs: Vec<Vec<u8>>) -> OrmResult<Vec<Obj<T>>> {
        refs.iter().map(|key| self.load_ref(db, key)).collect()
    }
}

/// Objects of a bucket in primary key order
pub struct ObjIter<'a, T> {
    bucket: &'a Bucket<T>,
    inner: KvIterator<'a>,
}

impl<T: Model> Iterator for ObjIter<'_, T> {
    type Item = OrmResult<Obj<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(
            item.map_err(OrmError::from)
                .and_then(|(key, value)| self.bucket.parse(&key, &value)),
        )
    }
}

/// Objects of a bucket in secondary key order
pub struct IndexedObjIter<'a, T> {
    bucket: &'a Bucket<T>,
    db: &'a dyn ReadOnlyKvStore,
    refs: IndexRefs<'a>,
}

impl<T: Model> Iterator for IndexedObjIter<'_, T> {
    type Item = OrmResult<Obj<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.refs.next()?;
        Some(item.and_then(|(_, pk)| self.bucket.load_ref(self.db, &pk)))
    }
}
