//! Persistent monotonic counters

use crate::error::{OrmError, OrmResult};
use tessera_store::{KvStore, ReadOnlyKvStore};

/// Key prefix shared by every sequence
pub const SEQUENCE_PREFIX: &str = "_s.";

/// Monotonic counter scoped to `(bucket, name)`.
///
/// Stored as an 8-byte big-endian integer under `_s.<bucket>:<name>`.
/// The first increment yields 1 and values are never reused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequence {
    id: Vec<u8>,
}

impl Sequence {
    /// Create a sequence handle
    pub fn new(bucket: &str, name: &str) -> Self {
        let id = format!("{SEQUENCE_PREFIX}{bucket}:{name}").into_bytes();
        Self { id }
    }

    /// Storage key of the counter
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    /// Current value, 0 if never incremented
    pub fn curr_val(&self, db: &dyn ReadOnlyKvStore) -> OrmResult<u64> {
        match db.get(&self.id)? {
            Some(raw) => decode_sequence(&raw),
            None => Ok(0),
        }
    }

    /// Increment and return the new value as an integer
    pub fn next_int(&self, db: &mut dyn KvStore) -> OrmResult<u64> {
        let next = self
            .curr_val(&*db)?
            .checked_add(1)
            .ok_or_else(|| OrmError::Overflow(String::from_utf8_lossy(&self.id).into_owned()))?;
        db.set(self.id.clone(), encode_sequence(next).to_vec())?;
        Ok(next)
    }

    /// Increment and return the new value encoded as a key
    pub fn next_val(&self, db: &mut dyn KvStore) -> OrmResult<Vec<u8>> {
        Ok(encode_sequence(self.next_int(db)?).to_vec())
    }
}

/// Encode a sequence value as 8 big-endian bytes, so numeric and key
/// order agree
pub fn encode_sequence(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Decode an 8-byte big-endian sequence value
pub fn decode_sequence(raw: &[u8]) -> OrmResult<u64> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| {
        OrmError::Database(format!("sequence value must be 8 bytes, got {}", raw.len()))
    })?;
    Ok(u64::from_be_bytes(bytes))
}
