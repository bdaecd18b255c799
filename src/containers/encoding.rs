//! Append-only string interning for categorical and join-key columns.
//!
//! Integer ids are assigned in insertion order, so a fit over the same data
//! always produces the same encoding. During transform the encoding is
//! shared read-only across shards; during fit it is append-only under a
//! single-thread invariant.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel id for a string that is not part of the encoding.
pub const NOT_KNOWN: i64 = -1;

/// A bidirectional string <-> int encoding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Encoding {
    values: Vec<String>,
    #[serde(skip)]
    lookup: HashMap<String, i64>,
}

impl Encoding {
    pub fn new() -> Self {
        Encoding::default()
    }

    /// Interns `value`, assigning the next id if it is new.
    pub fn insert(&mut self, value: &str) -> i64 {
        if let Some(&ix) = self.lookup.get(value) {
            return ix;
        }
        let ix = self.values.len() as i64;
        self.values.push(value.to_string());
        self.lookup.insert(value.to_string(), ix);
        ix
    }

    /// Read-only lookup. Returns [`NOT_KNOWN`] for strings the fit never saw.
    pub fn get(&self, value: &str) -> i64 {
        self.lookup.get(value).copied().unwrap_or(NOT_KNOWN)
    }

    /// The string for an id. Panics on out-of-range ids in debug builds.
    pub fn value(&self, ix: i64) -> &str {
        debug_assert!(ix >= 0 && (ix as usize) < self.values.len());
        &self.values[ix as usize]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Rebuilds the lookup table after deserialization.
    pub fn rebuild_lookup(&mut self) {
        self.lookup = self
            .values
            .iter()
            .enumerate()
            .map(|(ix, v)| (v.clone(), ix as i64))
            .collect();
    }
}
