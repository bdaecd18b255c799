//! Loss functions and the tree-facing loss contract.
//!
//! The decision tree never talks to a terminal loss directly: it sees a
//! [`LossFunction`], and the aggregation layer implements that same contract
//! while forwarding transformed statistics to its child. The composition is
//! monomorphised (`Aggregation<SquareLoss>`), so the CalcDiff hot loop has
//! no dynamic dispatch.

pub mod square_loss;

pub use square_loss::SquareLoss;

use crate::containers::Match;

/// How `calc_weights` should update the per-row sufficient statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// Recompute from scratch over all three ranges.
    CalcAll,
    /// Only process `[split_begin, split_end)` - the rows whose side changed
    /// since the previous candidate.
    CalcDiff,
}

/// Whether the candidate's delta is undone immediately after evaluation
/// (used when categorical values are tried independently from the baseline).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revert {
    True,
    False,
}

/// One closed-form leaf-weight triplet. A NaN component means "this side
/// keeps the old weight"; a NaN intercept marks the triplet as infeasible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub intercept: f64,
    pub greater: f64,
    pub smaller: f64,
}

impl Weights {
    pub fn is_feasible(&self) -> bool {
        !self.intercept.is_nan()
    }

    pub fn has_infinite(&self) -> bool {
        self.intercept.is_infinite()
            || self.greater.is_infinite()
            || self.smaller.is_infinite()
    }
}

/// The contract an aggregation needs from its child: difference-based
/// statistic updates plus the closed-form weight and evaluation math.
pub trait TerminalLoss {
    /// Reports one η mutation for output row `ix` (projected values before
    /// and after). Called from the CalcDiff hot loop; implementations keep
    /// their running sums consistent in O(1).
    fn eta_delta(&mut self, ix: usize, old1: f64, new1: f64, old2: f64, new2: f64);

    /// Zeroes the η statistics. Only valid when every touched row's η has
    /// just been zeroed, making the exact sums zero.
    fn reset_stats(&mut self);

    /// Folds a committed split delta into row `ix`.
    fn fold_row(&mut self, ix: usize, delta: f64);

    fn set_intercept(&mut self, intercept: f64);

    fn intercept(&self) -> f64;

    fn calc_weights(
        &self,
        old_weight: f64,
        num_samples_1: f64,
        num_samples_2: f64,
        min_num_samples: f64,
    ) -> Vec<Weights>;

    fn evaluate(&self, old_weight: f64, weights: &Weights) -> f64;

    fn commit(&mut self);

    fn calc_update_rate(&self, predictions: &[f64]) -> f64;

    fn evaluate_tree(&self, update_rate: f64, predictions: &[f64]) -> f64;
}

/// The contract between the decision tree and whatever sits below it -
/// either an aggregation or the terminal loss itself.
///
/// `matches` is the tree's contiguous match buffer; `begin`, `split_begin`,
/// `split_end` and `end` delimit the smaller/greater ranges of the candidate
/// under evaluation (greater side is `[split_begin, split_end)` for
/// `CalcAll`; for `CalcDiff` that range holds only the strip of matches that
/// crossed the threshold since the last candidate).
pub trait LossFunction {
    /// Updates the per-row sufficient statistics for the candidate and
    /// returns up to three closed-form leaf-weight triplets, each already
    /// gated by `min_num_samples`.
    fn calc_weights(
        &mut self,
        update: Update,
        min_num_samples: f64,
        old_weight: f64,
        matches: &[Match],
        begin: usize,
        split_begin: usize,
        split_end: usize,
        end: usize,
    ) -> Vec<Weights>;

    /// The loss reduction of applying `weights` to the current candidate
    /// partition. Side-effect-free, so the tree can call it once per
    /// candidate triplet without disturbing state.
    fn evaluate_split(&self, old_weight: f64, weights: &Weights) -> f64;

    /// Commits the split described by the ranges: folds the new weights into
    /// the child residuals and makes the zero state the new baseline.
    fn commit_split(
        &mut self,
        old_weight: f64,
        weights: &Weights,
        matches: &[Match],
        begin: usize,
        split: usize,
        end: usize,
    );

    /// Freezes the committed baseline. Discards any pending candidate state;
    /// calling it twice in a row is a no-op the second time.
    fn commit(&mut self);

    /// Undoes the most recent candidate's delta, restoring the state the
    /// candidate started from. O(|indices_current|).
    fn revert(&mut self, old_weight: f64);

    /// Restores the state as of the last commit for every touched row.
    /// O(|indices|), not O(nrows).
    fn revert_to_commit(&mut self);

    /// The committed tree intercept.
    fn intercept(&self) -> f64;

    /// Line search for the per-tree update rate given the tree's raw
    /// per-row predictions.
    fn calc_update_rate(&self, predictions: &[f64]) -> f64;

    /// The loss reduction of adding `update_rate * predictions` to the
    /// committed prediction.
    fn evaluate_tree(&self, update_rate: f64, predictions: &[f64]) -> f64;
}
