//! Typed columns with a name and a semantic unit tag.

use serde::{Deserialize, Serialize};

/// Marker inside a unit string that allows a column to be compared against
/// same-unit columns but never aggregated.
pub const COMPARISON_ONLY: &str = "comparison only";

/// A named, typed column. The unit is a free-form semantic tag: two columns
/// with equal non-empty units are eligible for same-unit splits and
/// conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column<T> {
    name: String,
    unit: String,
    data: Vec<T>,
}

impl<T> Column<T> {
    pub fn new(name: impl Into<String>, data: Vec<T>) -> Self {
        Column {
            name: name.into(),
            unit: String::new(),
            data,
        }
    }

    pub fn with_unit(name: impl Into<String>, unit: impl Into<String>, data: Vec<T>) -> Self {
        Column {
            name: name.into(),
            unit: unit.into(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Whether the unit flags this column as usable in comparisons only.
    pub fn is_comparison_only(&self) -> bool {
        self.unit.contains(COMPARISON_ONLY)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }
}

impl<T: Copy> Column<T> {
    #[inline]
    pub fn get(&self, ix: usize) -> T {
        self.data[ix]
    }
}

impl Column<String> {
    pub fn get_str(&self, ix: usize) -> &str {
        &self.data[ix]
    }
}

impl<T> std::ops::Index<usize> for Column<T> {
    type Output = T;

    #[inline]
    fn index(&self, ix: usize) -> &T {
        &self.data[ix]
    }
}
