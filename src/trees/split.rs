//! Candidate split descriptors.

use serde::{Deserialize, Serialize};

/// Which column(s) of which side participate in a split. Input is the
/// peripheral table, output the population table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataUsed {
    CategoricalInput,
    CategoricalOutput,
    DiscreteInput,
    DiscreteInputIsNan,
    DiscreteOutput,
    DiscreteOutputIsNan,
    NumericalInput,
    NumericalInputIsNan,
    NumericalOutput,
    NumericalOutputIsNan,
    SameUnitsCategorical,
    SameUnitsDiscrete,
    SameUnitsDiscreteIsNan,
    SameUnitsNumerical,
    SameUnitsNumericalIsNan,
    TimeStampsDiff,
}

/// One candidate binary test. Copy-cheap for the numeric variants and
/// immutable after construction; categorical splits carry the set of
/// category ids sent to the greater branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub data_used: DataUsed,
    /// The column on the side `data_used` names; the output column for
    /// same-units variants.
    pub column: usize,
    /// The input column for same-units variants, unused otherwise.
    pub column_input: usize,
    /// Threshold for numeric variants (`value > critical_value` goes to the
    /// greater branch).
    pub critical_value: f64,
    /// Category ids sent to the greater branch, for categorical variants.
    pub categories: Vec<i64>,
}

impl Split {
    pub fn numeric(data_used: DataUsed, column: usize, critical_value: f64) -> Self {
        Split {
            data_used,
            column,
            column_input: 0,
            critical_value,
            categories: Vec::new(),
        }
    }

    pub fn same_units(
        data_used: DataUsed,
        column_output: usize,
        column_input: usize,
        critical_value: f64,
    ) -> Self {
        Split {
            data_used,
            column: column_output,
            column_input,
            critical_value,
            categories: Vec::new(),
        }
    }

    pub fn categorical(data_used: DataUsed, column: usize, categories: Vec<i64>) -> Self {
        Split {
            data_used,
            column,
            column_input: 0,
            critical_value: f64::NAN,
            categories,
        }
    }

    pub fn sends_greater(&self, category: i64) -> bool {
        self.categories.contains(&category)
    }
}

/// A scored candidate: the split, its closed-form weights and the loss
/// reduction the evaluator assigned to them.
#[derive(Debug, Clone)]
pub struct CandidateSplit {
    pub loss_reduction: f64,
    pub split: Split,
    pub weights: crate::loss::Weights,
}
