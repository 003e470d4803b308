//! Model traits and the value codec

use crate::error::{OrmError, OrmResult};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Anything that can check its own invariants
pub trait Validate {
    /// Return `Err` if the value must not be persisted or processed
    fn validate(&self) -> OrmResult<()>;
}

/// A value that can be stored in a bucket.
///
/// Encoding goes through [`encode`]/[`decode`], which are deterministic:
/// equal values always produce equal bytes.
pub trait Model: Validate + Clone + Serialize + DeserializeOwned {
    /// Serialize to bytes
    fn marshal(&self) -> OrmResult<Vec<u8>> {
        encode(self)
    }

    /// Deserialize from bytes
    fn unmarshal(bytes: &[u8]) -> OrmResult<Self> {
        decode(bytes)
    }
}

/// A model that carries its own primary key
pub trait SerialModel: Model {
    /// Primary key, empty until one is allocated
    fn id(&self) -> &[u8];

    /// Set the primary key
    fn set_id(&mut self, id: Vec<u8>);
}

// Fixed-width little-endian integers, no size limit
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode a value with the deterministic codec
pub fn encode<T: Serialize + ?Sized>(value: &T) -> OrmResult<Vec<u8>> {
    codec()
        .serialize(value)
        .map_err(|e| OrmError::Serialization(e.to_string()))
}

/// Decode a value with the deterministic codec. Trailing bytes are an error.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> OrmResult<T> {
    codec()
        .deserialize(bytes)
        .map_err(|e| OrmError::Deserialize(e.to_string()))
}

/// Require a non-empty byte field
pub fn require_non_empty(field: &str, value: &[u8]) -> OrmResult<()> {
    if value.is_empty() {
        return Err(OrmError::InvalidModel(format!("{field} is required")));
    }
    Ok(())
}
