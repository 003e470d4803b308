//! Sorted set of primary keys stored by non-unique indexes

use crate::error::{OrmError, OrmResult};
use crate::model::{Model, Validate};
use serde::{Deserialize, Serialize};

/// Ordered, deduplicated list of primary keys
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiRef {
    refs: Vec<Vec<u8>>,
}

impl MultiRef {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from arbitrary keys, sorting and dropping duplicates
    pub fn from_keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut refs: Vec<Vec<u8>> = keys.into_iter().collect();
        refs.sort();
        refs.dedup();
        Self { refs }
    }

    /// Insert `key` keeping order. Returns false if it was already present.
    pub fn add(&mut self, key: &[u8]) -> bool {
        match self.refs.binary_search_by(|r| r.as_slice().cmp(key)) {
            Ok(_) => false,
            Err(pos) => {
                self.refs.insert(pos, key.to_vec());
                true
            }
        }
    }

    /// Remove `key`, failing with `NotFound` if it is not present
    pub fn remove(&mut self, key: &[u8]) -> OrmResult<()> {
        match self.refs.binary_search_by(|r| r.as_slice().cmp(key)) {
            Ok(pos) => {
                self.refs.remove(pos);
                Ok(())
            }
            Err(_) => Err(OrmError::not_found(key)),
        }
    }

    /// Check membership
    pub fn contains(&self, key: &[u8]) -> bool {
        self.refs
            .binary_search_by(|r| r.as_slice().cmp(key))
            .is_ok()
    }

    /// Keys in ascending order
    pub fn refs(&self) -> &[Vec<u8>] {
        &self.refs
    }

    /// Take the keys
    pub fn into_refs(self) -> Vec<Vec<u8>> {
        self.refs
    }

    /// Get number of keys
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Check if no key is referenced
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

impl Validate for MultiRef {
    fn validate(&self) -> OrmResult<()> {
        if self.refs.windows(2).any(|w| w[0] >= w[1]) {
            return Err(OrmError::InvalidModel(
                "multiref must be sorted without duplicates".into(),
            ));
        }
        if self.refs.iter().any(|r| r.is_empty()) {
            return Err(OrmError::InvalidModel("multiref holds an empty key".into()));
        }
        Ok(())
    }
}

impl Model for MultiRef {}
