//! Key/value pairs stored in buckets

use crate::error::{OrmError, OrmResult};
use crate::model::Validate;

/// A primary key together with its value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Obj<T> {
    key: Vec<u8>,
    value: T,
}

impl<T> Obj<T> {
    /// Create an object
    pub fn new(key: impl Into<Vec<u8>>, value: T) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Primary key (without bucket prefix)
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Stored value
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Mutable access to the stored value
    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// Replace the primary key
    pub fn set_key(&mut self, key: Vec<u8>) {
        self.key = key;
    }

    /// Take the value, dropping the key
    pub fn into_value(self) -> T {
        self.value
    }

    /// Split into key and value
    pub fn into_parts(self) -> (Vec<u8>, T) {
        (self.key, self.value)
    }
}

impl<T: Validate> Obj<T> {
    /// Check the key is set and the value is valid
    pub fn validate(&self) -> OrmResult<()> {
        if self.key.is_empty() {
            return Err(OrmError::InvalidModel("missing object key".into()));
        }
        self.value.validate()
    }
}
