//! Secondary indexes kept consistent by buckets

use crate::error::{OrmError, OrmResult};
use crate::model::Model;
use crate::multiref::MultiRef;
use crate::object::Obj;
use std::collections::VecDeque;
use std::sync::Arc;
use tessera_store::{prefix_range, KvIterator, KvStore, ReadOnlyKvStore};

/// Key prefix shared by every index entry
pub const INDEX_PREFIX: &str = "_i:";

/// Computes every secondary key of an object.
///
/// Empty keys are ignored, so returning `vec![]` or an empty key means the
/// object is not indexed.
pub type MultiKeyIndexer<T> = Arc<dyn Fn(&Obj<T>) -> OrmResult<Vec<Vec<u8>>> + Send + Sync>;

/// Secondary index over a bucket.
///
/// Entries live under `_i:<name>:<secondary key>`. Once registered on a
/// bucket the name is scoped to `<bucket>:<name>`, so equally named indexes
/// of different buckets never share entries. A unique index stores the
/// referenced primary key as is; a non-unique index stores a [`MultiRef`].
pub struct Index<T> {
    name: String,
    id: Vec<u8>,
    unique: bool,
    indexer: MultiKeyIndexer<T>,
}

impl<T> Clone for Index<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            id: self.id.clone(),
            unique: self.unique,
            indexer: Arc::clone(&self.indexer),
        }
    }
}

impl<T> std::fmt::Debug for Index<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("unique", &self.unique)
            .finish()
    }
}

impl<T: Model> Index<T> {
    /// Create an index producing at most one secondary key per object
    pub fn new<F>(name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Option<Vec<u8>>> + Send + Sync + 'static,
    {
        Self::new_multi_key(
            name,
            move |obj: &Obj<T>| Ok(indexer(obj)?.into_iter().collect()),
            unique,
        )
    }

    /// Create an index producing any number of secondary keys per object
    pub fn new_multi_key<F>(name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Vec<Vec<u8>>> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            id: format!("{INDEX_PREFIX}{name}:").into_bytes(),
            unique,
            indexer: Arc::new(indexer),
        }
    }

    /// Move the entries under the keyspace of `bucket`
    pub(crate) fn scoped(mut self, bucket: &str) -> Self {
        self.id = format!("{INDEX_PREFIX}{bucket}:{}:", self.name).into_bytes();
        self
    }

    /// Index name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a secondary key may reference only one object
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Storage key for a secondary key
    pub fn db_key(&self, key: &[u8]) -> Vec<u8> {
        let mut db_key = Vec::with_capacity(self.id.len() + key.len());
        db_key.extend_from_slice(&self.id);
        db_key.extend_from_slice(key);
        db_key
    }

    /// Secondary keys of `obj`: sorted, deduplicated, empty keys dropped
    pub fn keys_of(&self, obj: &Obj<T>) -> OrmResult<Vec<Vec<u8>>> {
        let mut keys: Vec<Vec<u8>> = (self.indexer)(obj)?
            .into_iter()
            .filter(|k| !k.is_empty())
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Bring the index in line with a change of one object.
    ///
    /// | prev | next | effect |
    /// |------|------|--------|
    /// | None | None | `InvalidArgument` |
    /// | None | Some | insert |
    /// | Some | None | remove |
    /// | Some | Some | move; primary keys must match |
    pub fn update(
        &self,
        db: &mut dyn KvStore,
        prev: Option<&Obj<T>>,
        next: Option<&Obj<T>>,
    ) -> OrmResult<()> {
        match (prev, next) {
            (None, None) => Err(OrmError::InvalidArgument(format!(
                "index {}: update needs a previous or a next object",
                self.name
            ))),
            (None, Some(next)) => self.insert(db, next),
            (Some(prev), None) => self.remove(db, prev),
            (Some(prev), Some(next)) => self.move_refs(db, prev, next),
        }
    }

    fn insert(&self, db: &mut dyn KvStore, obj: &Obj<T>) -> OrmResult<()> {
        for key in self.keys_of(obj)? {
            self.add_ref(db, &key, obj.key())?;
        }
        Ok(())
    }

    fn remove(&self, db: &mut dyn KvStore, obj: &Obj<T>) -> OrmResult<()> {
        for key in self.keys_of(obj)? {
            self.remove_ref(db, &key, obj.key())?;
        }
        Ok(())
    }

    fn move_refs(&self, db: &mut dyn KvStore, prev: &Obj<T>, next: &Obj<T>) -> OrmResult<()> {
        if prev.key() != next.key() {
            return Err(OrmError::InvalidArgument(format!(
                "index {}: cannot move between primary keys {} and {}",
                self.name,
                hex::encode(prev.key()),
                hex::encode(next.key())
            )));
        }
        let old_keys = self.keys_of(prev)?;
        let new_keys = self.keys_of(next)?;
        if old_keys == new_keys {
            return Ok(());
        }

        // Claim new keys first so a unique conflict leaves the old mapping intact
        for key in new_keys.iter().filter(|k| !old_keys.contains(k)) {
            self.add_ref(db, key, next.key())?;
        }
        for key in old_keys.iter().filter(|k| !new_keys.contains(k)) {
            self.remove_ref(db, key, prev.key())?;
        }
        Ok(())
    }

    fn add_ref(&self, db: &mut dyn KvStore, key: &[u8], pk: &[u8]) -> OrmResult<()> {
        let db_key = self.db_key(key);
        if self.unique {
            return match db.get(&db_key)? {
                Some(existing) if existing == pk => Ok(()),
                Some(_) => Err(OrmError::Duplicate(format!(
                    "index {} already holds key {}",
                    self.name,
                    hex::encode(key)
                ))),
                None => Ok(db.set(db_key, pk.to_vec())?),
            };
        }

        let mut refs = match db.get(&db_key)? {
            Some(raw) => MultiRef::unmarshal(&raw)?,
            None => MultiRef::new(),
        };
        if refs.add(pk) {
            db.set(db_key, refs.marshal()?)?;
        }
        Ok(())
    }

    fn remove_ref(&self, db: &mut dyn KvStore, key: &[u8], pk: &[u8]) -> OrmResult<()> {
        let db_key = self.db_key(key);
        let raw = db.get(&db_key)?.ok_or_else(|| {
            OrmError::NotFound(format!("index {} key {}", self.name, hex::encode(key)))
        })?;

        if self.unique {
            if raw != pk {
                return Err(OrmError::InvalidState(format!(
                    "index {} key {} references another object",
                    self.name,
                    hex::encode(key)
                )));
            }
            db.delete(&db_key)?;
            return Ok(());
        }

        let mut refs = MultiRef::unmarshal(&raw)?;
        refs.remove(pk)?;
        if refs.is_empty() {
            db.delete(&db_key)?;
        } else {
            db.set(db_key, refs.marshal()?)?;
        }
        Ok(())
    }

    /// Primary keys referenced by one secondary key, ascending. Empty if
    /// nothing is indexed under it.
    pub fn get_at(&self, db: &dyn ReadOnlyKvStore, key: &[u8]) -> OrmResult<Vec<Vec<u8>>> {
        if key.is_empty() {
            return Ok(Vec::new());
        }
        match db.get(&self.db_key(key))? {
            Some(raw) => decode_refs(self.unique, raw),
            None => Ok(Vec::new()),
        }
    }

    /// Primary keys sharing any secondary key with `pattern`
    pub fn get_like(&self, db: &dyn ReadOnlyKvStore, pattern: &Obj<T>) -> OrmResult<Vec<Vec<u8>>> {
        let mut refs = Vec::new();
        for key in self.keys_of(pattern)? {
            refs.extend(self.get_at(db, &key)?);
        }
        Ok(MultiRef::from_keys(refs).into_refs())
    }

    /// Primary keys of every secondary key starting with `prefix`, in
    /// secondary key order
    pub fn get_prefix(&self, db: &dyn ReadOnlyKvStore, prefix: &[u8]) -> OrmResult<Vec<Vec<u8>>> {
        self.scan(db, prefix, false)?
            .map(|item| item.map(|(_, pk)| pk))
            .collect()
    }

    /// Iterate `(secondary key, primary key)` pairs for secondary keys
    /// starting with `prefix`
    pub fn scan<'a>(
        &self,
        db: &'a dyn ReadOnlyKvStore,
        prefix: &[u8],
        reverse: bool,
    ) -> OrmResult<IndexRefs<'a>> {
        let (start, end) = prefix_range(&self.db_key(prefix));
        let inner = if reverse {
            db.reverse_iterator(start.as_deref(), end.as_deref())?
        } else {
            db.iterator(start.as_deref(), end.as_deref())?
        };
        Ok(IndexRefs {
            inner,
            id_len: self.id.len(),
            unique: self.unique,
            reverse,
            pending: VecDeque::new(),
        })
    }
}

fn decode_refs(unique: bool, raw: Vec<u8>) -> OrmResult<Vec<Vec<u8>>> {
    if unique {
        Ok(vec![raw])
    } else {
        Ok(MultiRef::unmarshal(&raw)?.into_refs())
    }
}

/// Iterator over index entries, one primary key at a time
pub struct IndexRefs<'a> {
    inner: KvIterator<'a>,
    id_len: usize,
    unique: bool,
    reverse: bool,
    pending: VecDeque<(Vec<u8>, Vec<u8>)>,
}

impl Iterator for IndexRefs<'_> {
    /// `(secondary key, primary key)`
    type Item = OrmResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pair) = self.pending.pop_front() {
                return Some(Ok(pair));
            }
            let (db_key, raw) = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };
            let secondary = db_key[self.id_len..].to_vec();
            let mut refs = match decode_refs(self.unique, raw) {
                Ok(refs) => refs,
                Err(e) => return Some(Err(e)),
            };
            if self.reverse {
                refs.reverse();
            }
            self.pending
                .extend(refs.into_iter().map(|pk| (secondary.clone(), pk)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Validate;
    use serde::{Deserialize, Serialize};
    use tessera_store::MemStore;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: u64,
        tags: Vec<String>,
    }

    impl Validate for Counter {
        fn validate(&self) -> OrmResult<()> {
            Ok(())
        }
    }

    impl Model for Counter {}

    fn counter(key: &str, count: u64) -> Obj<Counter> {
        Obj::new(
            key.as_bytes().to_vec(),
            Counter {
                count,
                tags: Vec::new(),
            },
        )
    }

    fn count_index(unique: bool) -> Index<Counter> {
        Index::new(
            "count",
            |obj: &Obj<Counter>| Ok(Some(obj.value().count.to_be_bytes().to_vec())),
            unique,
        )
    }

    fn tag_index() -> Index<Counter> {
        Index::new_multi_key(
            "tags",
            |obj: &Obj<Counter>| {
                Ok(obj
                    .value()
                    .tags
                    .iter()
                    .map(|t| t.as_bytes().to_vec())
                    .collect())
            },
            false,
        )
    }

    fn key(n: u64) -> Vec<u8> {
        n.to_be_bytes().to_vec()
    }

    // ==================== Update Transition Tests ====================

    #[test]
    fn test_update_none_none_is_invalid() {
        let mut db = MemStore::new();
        let index = count_index(true);
        assert!(matches!(
            index.update(&mut db, None, None),
            Err(OrmError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unique_insert_and_duplicate() {
        let mut db = MemStore::new();
        let index = count_index(true);

        index.update(&mut db, None, Some(&counter("a", 5))).unwrap();
        assert_eq!(index.get_at(&db, &key(5)).unwrap(), vec![b"a".to_vec()]);
        assert_eq!(db.get(b"_i:count:\0\0\0\0\0\0\0\x05").unwrap(), Some(b"a".to_vec()));

        let err = index
            .update(&mut db, None, Some(&counter("b", 5)))
            .unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(index.get_at(&db, &key(5)).unwrap(), vec![b"a".to_vec()]);

        // Re-inserting the same mapping is idempotent
        index.update(&mut db, None, Some(&counter("a", 5))).unwrap();
    }

    #[test]
    fn test_move_changes_mapping() {
        let mut db = MemStore::new();
        let index = count_index(true);
        let before = counter("a", 1);
        let after = counter("a", 2);

        index.update(&mut db, None, Some(&before)).unwrap();
        index.update(&mut db, Some(&before), Some(&after)).unwrap();

        assert!(index.get_at(&db, &key(1)).unwrap().is_empty());
        assert_eq!(index.get_at(&db, &key(2)).unwrap(), vec![b"a".to_vec()]);
    }

    #[test]
    fn test_move_unchanged_key_is_noop() {
        let mut db = MemStore::new();
        let index = count_index(true);
        let obj = counter("a", 1);
        index.update(&mut db, None, Some(&obj)).unwrap();
        let before = db.snapshot();

        index.update(&mut db, Some(&obj), Some(&obj)).unwrap();
        assert_eq!(db.snapshot(), before);
    }

    #[test]
    fn test_move_requires_same_primary_key() {
        let mut db = MemStore::new();
        let index = count_index(true);
        let result = index.update(&mut db, Some(&counter("a", 1)), Some(&counter("b", 1)));
        assert!(matches!(result, Err(OrmError::InvalidArgument(_))));
    }

    #[test]
    fn test_move_conflict_keeps_old_mapping() {
        let mut db = MemStore::new();
        let index = count_index(true);
        index.update(&mut db, None, Some(&counter("a", 1))).unwrap();
        index.update(&mut db, None, Some(&counter("b", 2))).unwrap();

        let err = index
            .update(&mut db, Some(&counter("a", 1)), Some(&counter("a", 2)))
            .unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(index.get_at(&db, &key(1)).unwrap(), vec![b"a".to_vec()]);
        assert_eq!(index.get_at(&db, &key(2)).unwrap(), vec![b"b".to_vec()]);
    }

    #[test]
    fn test_remove_deletes_entry() {
        let mut db = MemStore::new();
        let index = count_index(true);
        let obj = counter("a", 1);
        index.update(&mut db, None, Some(&obj)).unwrap();
        index.update(&mut db, Some(&obj), None).unwrap();
        assert!(db.is_empty());

        assert!(index
            .update(&mut db, Some(&obj), None)
            .unwrap_err()
            .is_not_found());
    }

    // ==================== Non-unique Tests ====================

    #[test]
    fn test_multi_ref_accumulates_sorted() {
        let mut db = MemStore::new();
        let index = count_index(false);
        for name in ["c", "a", "b"] {
            index.update(&mut db, None, Some(&counter(name, 7))).unwrap();
        }
        assert_eq!(
            index.get_at(&db, &key(7)).unwrap(),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );

        index.update(&mut db, Some(&counter("b", 7)), None).unwrap();
        index.update(&mut db, Some(&counter("a", 7)), None).unwrap();
        assert_eq!(index.get_at(&db, &key(7)).unwrap(), vec![b"c".to_vec()]);

        index.update(&mut db, Some(&counter("c", 7)), None).unwrap();
        assert!(db.is_empty(), "empty multiref must be deleted");
    }

    #[test]
    fn test_multi_key_index() {
        let mut db = MemStore::new();
        let index = tag_index();
        let mut obj = counter("a", 0);
        obj.value_mut().tags = vec!["red".into(), "blue".into(), "red".into(), String::new()];
        index.update(&mut db, None, Some(&obj)).unwrap();

        assert_eq!(index.keys_of(&obj).unwrap(), vec![b"blue".to_vec(), b"red".to_vec()]);
        assert_eq!(index.get_at(&db, b"red").unwrap(), vec![b"a".to_vec()]);
        assert_eq!(index.get_at(&db, b"blue").unwrap(), vec![b"a".to_vec()]);
        assert!(index.get_at(&db, b"").unwrap().is_empty());

        let mut moved = obj.clone();
        moved.value_mut().tags = vec!["blue".into(), "green".into()];
        index.update(&mut db, Some(&obj), Some(&moved)).unwrap();

        assert!(index.get_at(&db, b"red").unwrap().is_empty());
        assert_eq!(index.get_at(&db, b"green").unwrap(), vec![b"a".to_vec()]);
        assert_eq!(index.get_at(&db, b"blue").unwrap(), vec![b"a".to_vec()]);
    }

    #[test]
    fn test_empty_secondary_key_is_not_indexed() {
        let mut db = MemStore::new();
        let index: Index<Counter> = Index::new("empty", |_: &Obj<Counter>| Ok(Some(Vec::new())), true);
        index.update(&mut db, None, Some(&counter("a", 1))).unwrap();
        index.update(&mut db, None, Some(&counter("b", 1))).unwrap();
        assert!(db.is_empty());
    }

    // ==================== Query Tests ====================

    #[test]
    fn test_get_like_and_prefix() {
        let mut db = MemStore::new();
        let index = tag_index();
        for (name, tags) in [("a", vec!["x1", "y"]), ("b", vec!["x2"]), ("c", vec!["y"])] {
            let mut obj = counter(name, 0);
            obj.value_mut().tags = tags.into_iter().map(String::from).collect();
            index.update(&mut db, None, Some(&obj)).unwrap();
        }

        let mut pattern = counter("zzz", 0);
        pattern.value_mut().tags = vec!["y".into(), "x2".into()];
        assert_eq!(
            index.get_like(&db, &pattern).unwrap(),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );

        assert_eq!(
            index.get_prefix(&db, b"x").unwrap(),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
    }

    #[test]
    fn test_scan_reverse() {
        let mut db = MemStore::new();
        let index = count_index(false);
        for (name, count) in [("a", 1), ("b", 1), ("c", 2)] {
            index.update(&mut db, None, Some(&counter(name, count))).unwrap();
        }
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = index
            .scan(&db, &[], true)
            .unwrap()
            .map(|item| item.unwrap())
            .collect();
        assert_eq!(
            pairs,
            vec![
                (key(2), b"c".to_vec()),
                (key(1), b"b".to_vec()),
                (key(1), b"a".to_vec()),
            ]
        );
    }
}
