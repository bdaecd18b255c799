//! The emitted feature matrix.

/// A per-row feature matrix. Values are coerced on insertion: NaN and ±∞
/// become 0.0, so downstream predictors never see non-finite cells. The
/// coercion is part of the type's contract, not a configurable default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    rows: Vec<Vec<f64>>,
}

impl Features {
    pub fn with_capacity(nrows: usize) -> Self {
        Features {
            rows: Vec::with_capacity(nrows),
        }
    }

    /// Builds the matrix from raw rows, coercing every cell.
    pub fn from_rows(raw: Vec<Vec<f64>>) -> Self {
        let rows = raw
            .into_iter()
            .map(|row| row.into_iter().map(coerce).collect())
            .collect();
        Features { rows }
    }

    /// Appends one row, coercing every cell.
    pub fn push_coerced(&mut self, row: Vec<f64>) {
        self.rows.push(row.into_iter().map(coerce).collect());
    }

    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    pub fn ncols(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn row(&self, ix: usize) -> &[f64] {
        &self.rows[ix]
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<f64>> {
        self.rows
    }
}

#[inline]
fn coerce(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}
