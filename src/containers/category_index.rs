//! Per-node index over a match range sorted by category.

use crate::containers::matches::Match;
use std::collections::HashMap;

/// Maps a category id to its contiguous subrange of a match buffer that has
/// been sorted by that category. Built freshly for every (node, categorical
/// column) pair.
#[derive(Debug, Default)]
pub struct CategoryIndex {
    ranges: HashMap<i64, (usize, usize)>,
}

impl CategoryIndex {
    /// Builds the range table by walking the sorted slice once. `value`
    /// extracts the category id of a match. Offsets are absolute positions
    /// in the underlying buffer (`begin`-based).
    pub fn build(
        matches: &[Match],
        begin: usize,
        end: usize,
        value: impl Fn(&Match) -> i64,
    ) -> Self {
        let mut ranges = HashMap::new();
        let mut run_start = begin;
        let mut ix = begin;
        while ix < end {
            let cat = value(&matches[ix]);
            if ix + 1 == end || value(&matches[ix + 1]) != cat {
                ranges.insert(cat, (run_start, ix + 1));
                run_start = ix + 1;
            }
            ix += 1;
        }
        CategoryIndex { ranges }
    }

    /// The `[begin, end)` range of matches carrying `category`, empty when
    /// the category does not occur in the node.
    pub fn range(&self, category: i64) -> (usize, usize) {
        self.ranges.get(&category).copied().unwrap_or((0, 0))
    }

    pub fn num_categories(&self) -> usize {
        self.ranges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(ix_output: usize, ix_input: usize) -> Match {
        Match { ix_output, ix_input }
    }

    #[test]
    fn test_contiguous_ranges() {
        // Category of a match is its ix_input here.
        let matches = vec![m(0, 2), m(1, 2), m(0, 5), m(1, 5), m(2, 5), m(0, 9)];
        let index = CategoryIndex::build(&matches, 0, matches.len(), |mm| mm.ix_input as i64);

        assert_eq!(index.range(2), (0, 2));
        assert_eq!(index.range(5), (2, 5));
        assert_eq!(index.range(9), (5, 6));
        assert_eq!(index.range(42), (0, 0));
        assert_eq!(index.num_categories(), 3);
    }
}
