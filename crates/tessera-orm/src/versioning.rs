//! Append-only versioned records

use crate::bucket::Bucket;
use crate::error::{OrmError, OrmResult};
use crate::model::Model;
use crate::model_bucket::ID_SEQUENCE;
use crate::object::Obj;
use crate::sequence::Sequence;
use tessera_store::{CacheOverlay, KvStore, ReadOnlyKvStore};

/// Reference to one version of a record.
///
/// Encoded as `u32_be(len(id)) || id || u32_be(version)`: all versions of an
/// id share a prefix and sort by version.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VersionedIdRef {
    /// Record id
    pub id: Vec<u8>,
    /// Version, starting at 1
    pub version: u32,
}

impl VersionedIdRef {
    /// Create a reference
    pub fn new(id: impl Into<Vec<u8>>, version: u32) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }

    /// Check the id is set and the version is at least 1
    pub fn validate(&self) -> OrmResult<()> {
        if self.id.is_empty() {
            return Err(OrmError::InvalidModel("versioned ref has no id".into()));
        }
        if self.version == 0 {
            return Err(OrmError::InvalidModel("versioned ref has version 0".into()));
        }
        Ok(())
    }

    /// Reference to the following version of the same id
    pub fn next_version(&self) -> OrmResult<Self> {
        let version = self.version.checked_add(1).ok_or_else(|| {
            OrmError::Overflow(format!("version of {}", hex::encode(&self.id)))
        })?;
        Ok(Self::new(self.id.clone(), version))
    }

    /// Key prefix shared by every version of `id`
    pub fn id_prefix(id: &[u8]) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(4 + id.len());
        prefix.extend_from_slice(&(id.len() as u32).to_be_bytes());
        prefix.extend_from_slice(id);
        prefix
    }

    /// Encode as a bucket key
    pub fn encode(&self) -> Vec<u8> {
        let mut key = Self::id_prefix(&self.id);
        key.extend_from_slice(&self.version.to_be_bytes());
        key
    }

    /// Decode a bucket key
    pub fn decode(raw: &[u8]) -> OrmResult<Self> {
        let malformed = || OrmError::Database(format!("malformed versioned key {}", hex::encode(raw)));

        let (len, rest) = raw.split_first_chunk::<4>().ok_or_else(malformed)?;
        let len = u32::from_be_bytes(*len) as usize;
        if rest.len() != len + 4 {
            return Err(malformed());
        }
        let (id, version) = rest.split_at(len);
        let version: [u8; 4] = version.try_into().map_err(|_| malformed())?;
        Ok(Self::new(id, u32::from_be_bytes(version)))
    }
}

/// A model carrying its own version number
pub trait Versioned: Model {
    /// Current version, 0 for a record that was never stored
    fn version(&self) -> u32;

    /// Set the version
    fn set_version(&mut self, version: u32);
}

/// Bucket keeping every version of every record.
///
/// Records are never overwritten or deleted: `update` writes the next
/// version next to the previous ones.
pub struct VersioningBucket<T> {
    bucket: Bucket<T>,
    id_seq: Sequence,
}

impl<T> std::fmt::Debug for VersioningBucket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersioningBucket")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl<T: Versioned> VersioningBucket<T> {
    /// Create a versioning bucket. Panics on an invalid name.
    pub fn new(name: &str) -> Self {
        let bucket = Bucket::new(name);
        let id_seq = bucket.sequence(ID_SEQUENCE);
        Self { bucket, id_seq }
    }

    /// Register a single-key index.
    ///
    /// Every stored version is indexed as its own object, so versioning
    /// indexes are always non-unique.
    pub fn with_index<F>(self, name: &str, indexer: F) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Option<Vec<u8>>> + Send + Sync + 'static,
    {
        Self {
            bucket: self.bucket.with_index(name, indexer, false),
            id_seq: self.id_seq,
        }
    }

    /// Register a multi-key index. Always non-unique, like [`Self::with_index`].
    pub fn with_multi_key_index<F>(self, name: &str, indexer: F) -> Self
    where
        F: Fn(&Obj<T>) -> OrmResult<Vec<Vec<u8>>> + Send + Sync + 'static,
    {
        Self {
            bucket: self.bucket.with_multi_key_index(name, indexer, false),
            id_seq: self.id_seq,
        }
    }

    /// Underlying bucket
    pub fn bucket(&self) -> &Bucket<T> {
        &self.bucket
    }

    /// Store a new record as version 1 under a freshly allocated id
    pub fn create(&self, db: &mut dyn KvStore, mut data: T) -> OrmResult<VersionedIdRef> {
        if data.version() != 0 {
            return Err(OrmError::InvalidInput(format!(
                "new record must have version 0, got {}",
                data.version()
            )));
        }
        data.set_version(1);

        let mut tx = CacheOverlay::new(&mut *db);
        let id_ref = VersionedIdRef::new(self.id_seq.next_val(&mut tx)?, 1);
        self.bucket.save(&mut tx, &Obj::new(id_ref.encode(), data))?;
        tx.write()?;
        Ok(id_ref)
    }

    /// Store `data` as the version following `current`.
    ///
    /// `data` must carry `current`'s version, which guards against updating
    /// from a stale read.
    pub fn update(
        &self,
        db: &mut dyn KvStore,
        current: &VersionedIdRef,
        mut data: T,
    ) -> OrmResult<VersionedIdRef> {
        current.validate()?;
        if data.version() != current.version {
            return Err(OrmError::InvalidState(format!(
                "record has version {}, expected {}",
                data.version(),
                current.version
            )));
        }
        let next = current.next_version()?;
        if !self.bucket.has(&*db, &current.encode())? {
            return Err(OrmError::NotFound(format!(
                "{} version {}",
                hex::encode(&current.id),
                current.version
            )));
        }
        if self.bucket.has(&*db, &next.encode())? {
            return Err(OrmError::Duplicate(format!(
                "{} version {}",
                hex::encode(&next.id),
                next.version
            )));
        }

        data.set_version(next.version);
        self.bucket.save(db, &Obj::new(next.encode(), data))?;
        Ok(next)
    }

    /// Load one exact version
    pub fn get_version(&self, db: &dyn ReadOnlyKvStore, id_ref: &VersionedIdRef) -> OrmResult<T> {
        id_ref.validate()?;
        self.bucket
            .get(db, &id_ref.encode())?
            .map(Obj::into_value)
            .ok_or_else(|| {
                OrmError::NotFound(format!(
                    "{} version {}",
                    hex::encode(&id_ref.id),
                    id_ref.version
                ))
            })
    }

    /// Check if one exact version is stored
    pub fn exists(&self, db: &dyn ReadOnlyKvStore, id_ref: &VersionedIdRef) -> OrmResult<bool> {
        id_ref.validate()?;
        self.bucket.has(db, &id_ref.encode())
    }

    /// Load the highest stored version of `id`
    pub fn get_latest_version(
        &self,
        db: &dyn ReadOnlyKvStore,
        id: &[u8],
    ) -> OrmResult<(VersionedIdRef, T)> {
        let mut latest: Option<(VersionedIdRef, T)> = None;
        for obj in self
            .bucket
            .prefix_scan(db, &VersionedIdRef::id_prefix(id), false)?
        {
            let (key, value) = obj?.into_parts();
            let id_ref = VersionedIdRef::decode(&key)?;
            if latest.as_ref().is_none_or(|(best, _)| id_ref.version > best.version) {
                latest = Some((id_ref, value));
            }
        }
        latest.ok_or_else(|| OrmError::not_found(id))
    }
}
