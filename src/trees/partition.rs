//! Partitioning, sorting and threshold-finding over the match buffer.
//!
//! All routines are generic over a split-value accessor, which collapses the
//! per-variant clones of the source into one template each: the `DataUsed`
//! tag selects the accessor at the top of each `try_*` routine.

use crate::containers::dataframe::DataFrame;
use crate::containers::matches::Match;
use crate::trees::split::{DataUsed, Split};

/// Stable in-place partition of `matches[begin..end)`: matches for which
/// `pred` holds come first. Returns the pivot position.
pub fn partition_stable(
    matches: &mut [Match],
    begin: usize,
    end: usize,
    pred: impl Fn(&Match) -> bool,
) -> usize {
    let mut greater = Vec::with_capacity(end - begin);
    let mut smaller = Vec::with_capacity(end - begin);
    for m in &matches[begin..end] {
        if pred(m) {
            greater.push(*m);
        } else {
            smaller.push(*m);
        }
    }
    let pivot = begin + greater.len();
    matches[begin..pivot].copy_from_slice(&greater);
    matches[pivot..end].copy_from_slice(&smaller);
    pivot
}

/// Moves all matches with a NaN split value to the end of the range and
/// returns the start of the NaN block.
pub fn partition_nan_to_end(
    matches: &mut [Match],
    begin: usize,
    end: usize,
    value: impl Fn(&Match) -> f64,
) -> usize {
    partition_stable(matches, begin, end, |m| !value(m).is_nan())
}

/// Sorts `matches[begin..end)` in descending order of the split value.
/// The range must be NaN-free (see [`partition_nan_to_end`]).
pub fn sort_descending(
    matches: &mut [Match],
    begin: usize,
    end: usize,
    value: impl Fn(&Match) -> f64,
) {
    matches[begin..end].sort_by(|a, b| value(b).total_cmp(&value(a)));
}

/// Sorts `matches[begin..end)` in ascending order of a category id.
pub fn sort_by_category(
    matches: &mut [Match],
    begin: usize,
    end: usize,
    value: impl Fn(&Match) -> i64,
) {
    matches[begin..end].sort_by_key(|m| value(m));
}

/// Given a range sorted in descending order, advances `it` to the first
/// position whose value is not greater than `cv`. Everything in
/// `[begin, result)` then satisfies `value > cv`.
pub fn next_split(
    matches: &[Match],
    mut it: usize,
    end: usize,
    cv: f64,
    value: impl Fn(&Match) -> f64,
) -> usize {
    while it < end && value(&matches[it]) > cv {
        it += 1;
    }
    it
}

/// The float compared against a numeric split's critical value.
#[inline]
pub fn numeric_value(split: &Split, input: &DataFrame, output: &DataFrame, m: &Match) -> f64 {
    match split.data_used {
        DataUsed::DiscreteInput | DataUsed::DiscreteInputIsNan => {
            input.discretes()[split.column].get(m.ix_input)
        }
        DataUsed::DiscreteOutput | DataUsed::DiscreteOutputIsNan => {
            output.discretes()[split.column].get(m.ix_output)
        }
        DataUsed::NumericalInput | DataUsed::NumericalInputIsNan => {
            input.numericals()[split.column].get(m.ix_input)
        }
        DataUsed::NumericalOutput | DataUsed::NumericalOutputIsNan => {
            output.numericals()[split.column].get(m.ix_output)
        }
        DataUsed::SameUnitsDiscrete | DataUsed::SameUnitsDiscreteIsNan => {
            output.discretes()[split.column].get(m.ix_output)
                - input.discretes()[split.column_input].get(m.ix_input)
        }
        DataUsed::SameUnitsNumerical | DataUsed::SameUnitsNumericalIsNan => {
            output.numericals()[split.column].get(m.ix_output)
                - input.numericals()[split.column_input].get(m.ix_input)
        }
        DataUsed::TimeStampsDiff => output.time_stamp(m.ix_output) - input.time_stamp(m.ix_input),
        DataUsed::CategoricalInput
        | DataUsed::CategoricalOutput
        | DataUsed::SameUnitsCategorical => {
            unreachable!("categorical splits have no numeric value")
        }
    }
}

/// Whether a match goes to the greater branch of `split`.
#[inline]
pub fn is_greater(split: &Split, input: &DataFrame, output: &DataFrame, m: &Match) -> bool {
    match split.data_used {
        DataUsed::CategoricalInput => {
            split.sends_greater(input.categoricals()[split.column].get(m.ix_input))
        }
        DataUsed::CategoricalOutput => {
            split.sends_greater(output.categoricals()[split.column].get(m.ix_output))
        }
        DataUsed::SameUnitsCategorical => {
            input.categoricals()[split.column_input].get(m.ix_input)
                == output.categoricals()[split.column].get(m.ix_output)
        }
        DataUsed::DiscreteInputIsNan
        | DataUsed::DiscreteOutputIsNan
        | DataUsed::NumericalInputIsNan
        | DataUsed::NumericalOutputIsNan
        | DataUsed::SameUnitsDiscreteIsNan
        | DataUsed::SameUnitsNumericalIsNan => !numeric_value(split, input, output, m).is_nan(),
        _ => numeric_value(split, input, output, m) > split.critical_value,
    }
}

/// Partitions `matches[begin..end)` so matches going to the greater branch
/// come first. Returns the pivot.
pub fn partition_by_split(
    split: &Split,
    input: &DataFrame,
    output: &DataFrame,
    matches: &mut [Match],
    begin: usize,
    end: usize,
) -> usize {
    partition_stable(matches, begin, end, |m| is_greater(split, input, output, m))
}
