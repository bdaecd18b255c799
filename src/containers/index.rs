//! Join-key index: key value -> ordered row offsets.

use std::collections::BTreeMap;

/// Immutable index over one join-key column. Built once per table and held
/// for the full fit. The BTreeMap keeps lookups O(log N) and iteration
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct JoinKeyIndex {
    buckets: BTreeMap<i64, Vec<usize>>,
}

impl JoinKeyIndex {
    /// Builds the index from an encoded join-key column. Row offsets within
    /// a bucket retain table order.
    pub fn build(keys: &[i64]) -> Self {
        let mut buckets: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (row, &key) in keys.iter().enumerate() {
            buckets.entry(key).or_default().push(row);
        }
        JoinKeyIndex { buckets }
    }

    /// The rows carrying `key`, in table order.
    pub fn rows(&self, key: i64) -> &[usize] {
        self.buckets.get(&key).map_or(&[], Vec::as_slice)
    }

    pub fn num_keys(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_lookup() {
        let index = JoinKeyIndex::build(&[5, 3, 5, 5, 3]);
        assert_eq!(index.rows(5), &[0, 2, 3]);
        assert_eq!(index.rows(3), &[1, 4]);
        assert_eq!(index.rows(99), &[] as &[usize]);
        assert_eq!(index.num_keys(), 2);
    }
}
