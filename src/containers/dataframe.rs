//! Role-typed columnar tables.
//!
//! A `DataFrame` groups its columns by role: categoricals and join keys are
//! interned integers, discretes/numericals/targets/time stamps are floats,
//! text columns are raw strings. Every column in a table has the same row
//! count; `push_*` enforces this at insertion time.
//!
//! Time-stamp convention: the first time-stamp column of the population
//! table is *the* time stamp of a prediction unit; the first and second
//! time-stamp columns of a peripheral table are its lower and (optional)
//! upper time stamps.

use crate::containers::column::Column;
use crate::containers::index::JoinKeyIndex;
use crate::error::{Error, Result};

/// A named collection of typed columns with parallel row arrays.
#[derive(Debug, Clone, Default)]
pub struct DataFrame {
    name: String,
    categoricals: Vec<Column<i64>>,
    join_keys: Vec<Column<i64>>,
    discretes: Vec<Column<f64>>,
    numericals: Vec<Column<f64>>,
    targets: Vec<Column<f64>>,
    text: Vec<Column<String>>,
    time_stamps: Vec<Column<f64>>,
    indices: Vec<JoinKeyIndex>,
    nrows: usize,
    has_columns: bool,
}

impl DataFrame {
    pub fn new(name: impl Into<String>) -> Self {
        DataFrame {
            name: name.into(),
            ..DataFrame::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    fn check_nrows(&mut self, len: usize, name: &str) -> Result<()> {
        if self.has_columns && len != self.nrows {
            return Err(Error::Schema(format!(
                "column '{}' has {} rows, but table '{}' has {}",
                name, len, self.name, self.nrows
            )));
        }
        self.nrows = len;
        self.has_columns = true;
        Ok(())
    }

    pub fn push_categorical(&mut self, col: Column<i64>) -> Result<()> {
        self.check_nrows(col.len(), col.name())?;
        self.categoricals.push(col);
        Ok(())
    }

    /// Join-key columns also build their index eagerly; the index is
    /// immutable for the rest of the fit.
    pub fn push_join_key(&mut self, col: Column<i64>) -> Result<()> {
        self.check_nrows(col.len(), col.name())?;
        self.indices.push(JoinKeyIndex::build(col.data()));
        self.join_keys.push(col);
        Ok(())
    }

    pub fn push_discrete(&mut self, col: Column<f64>) -> Result<()> {
        self.check_nrows(col.len(), col.name())?;
        self.discretes.push(col);
        Ok(())
    }

    pub fn push_numerical(&mut self, col: Column<f64>) -> Result<()> {
        self.check_nrows(col.len(), col.name())?;
        self.numericals.push(col);
        Ok(())
    }

    pub fn push_target(&mut self, col: Column<f64>) -> Result<()> {
        self.check_nrows(col.len(), col.name())?;
        self.targets.push(col);
        Ok(())
    }

    pub fn push_text(&mut self, col: Column<String>) -> Result<()> {
        self.check_nrows(col.len(), col.name())?;
        self.text.push(col);
        Ok(())
    }

    pub fn push_time_stamp(&mut self, col: Column<f64>) -> Result<()> {
        self.check_nrows(col.len(), col.name())?;
        self.time_stamps.push(col);
        Ok(())
    }

    pub fn categoricals(&self) -> &[Column<i64>] {
        &self.categoricals
    }

    pub fn join_keys(&self) -> &[Column<i64>] {
        &self.join_keys
    }

    pub fn discretes(&self) -> &[Column<f64>] {
        &self.discretes
    }

    pub fn numericals(&self) -> &[Column<f64>] {
        &self.numericals
    }

    pub fn targets(&self) -> &[Column<f64>] {
        &self.targets
    }

    pub fn text(&self) -> &[Column<String>] {
        &self.text
    }

    pub fn time_stamps(&self) -> &[Column<f64>] {
        &self.time_stamps
    }

    /// The join-key index for join-key column `ix`.
    pub fn join_key_index(&self, ix: usize) -> &JoinKeyIndex {
        &self.indices[ix]
    }

    /// The first join-key column, or a schema error naming the table.
    pub fn primary_join_key(&self) -> Result<&Column<i64>> {
        self.join_keys.first().ok_or_else(|| {
            Error::Schema(format!("table '{}' has no join key column", self.name))
        })
    }

    /// The row's time stamp (first time-stamp column), NaN when the table
    /// carries none.
    #[inline]
    pub fn time_stamp(&self, row: usize) -> f64 {
        self.time_stamps.first().map_or(f64::NAN, |c| c.get(row))
    }

    /// The row's upper time stamp (second time-stamp column), NaN when
    /// absent. NaN means "no upper bound".
    #[inline]
    pub fn upper_time_stamp(&self, row: usize) -> f64 {
        self.time_stamps.get(1).map_or(f64::NAN, |c| c.get(row))
    }

    /// The first target column, or a schema error naming the table.
    pub fn primary_target(&self) -> Result<&Column<f64>> {
        self.targets.first().ok_or_else(|| {
            Error::Schema(format!("table '{}' has no target column", self.name))
        })
    }

    /// Looks up a float column of any role by name.
    pub fn float_column(&self, name: &str) -> Option<&Column<f64>> {
        self.numericals
            .iter()
            .chain(self.discretes.iter())
            .chain(self.targets.iter())
            .chain(self.time_stamps.iter())
            .find(|c| c.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_count_invariant() {
        let mut df = DataFrame::new("pop");
        df.push_numerical(Column::new("a", vec![1.0, 2.0])).expect("push");

        let err = df.push_numerical(Column::new("b", vec![1.0])).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert_eq!(df.nrows(), 2);
    }

    #[test]
    fn test_join_key_index_built_on_push() {
        let mut df = DataFrame::new("perip");
        df.push_join_key(Column::new("jk", vec![1, 2, 1])).expect("push");
        assert_eq!(df.join_key_index(0).rows(1), &[0, 2]);
    }

    #[test]
    fn test_time_stamp_defaults_to_nan() {
        let mut df = DataFrame::new("perip");
        df.push_numerical(Column::new("x", vec![0.5])).expect("push");
        assert!(df.time_stamp(0).is_nan());
        assert!(df.upper_time_stamp(0).is_nan());
    }
}
