//! Aggregation operators sitting between tree leaves and the terminal loss.
//!
//! An aggregation implements the [`LossFunction`] contract, so it looks just
//! like a loss function to the tree. It keeps per-output-row sufficient
//! statistics for the candidate split under evaluation and forwards every
//! change to its child after transforming the weight space:
//!
//! - **SUM**: `yhat[i] = count1[i]·w1 + count2[i]·w2`, so η is simply the
//!   count on each side.
//! - **AVG**: `yhat[i] = (count1[i]·w1 + count2[i]·w2) / count_committed[i]`.
//!   The division by `count_committed` (the row's total matches, fixed for
//!   one tree fit) is the only nonlinearity.
//!
//! η is maintained in count space - integer-valued f64 updates are exact,
//! which makes a CalcAll recomputation and any chain of CalcDiff updates
//! covering the same change set bit-equal. The AVG division is applied when
//! a statistic is projected into the child loss.
//!
//! A split commit folds `η1·(w1-w_old) + η2·(w2-w_old)` into the child
//! residuals and zeroes the per-row state, so the committed baseline is
//! identically zero and `revert_to_commit` is O(|touched rows|).

use crate::containers::{IntSet, Match};
use crate::loss::{LossFunction, TerminalLoss, Update, Weights};
use serde::{Deserialize, Serialize};

/// The aggregation operator applied over a row's matched leaf weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationKind {
    Avg,
    Sum,
}

impl AggregationKind {
    /// Aggregates a row's per-match leaf weights at transform time. NaN
    /// weights are skipped; a row with no usable weights aggregates to NaN
    /// ("no data"), which the feature output later coerces to 0.0.
    pub fn aggregate(self, weights: &[f64]) -> f64 {
        let mut count = 0.0;
        let mut sum = 0.0;
        for &w in weights {
            if !w.is_nan() {
                count += 1.0;
                sum += w;
            }
        }
        if count == 0.0 {
            return f64::NAN;
        }
        match self {
            AggregationKind::Avg => sum / count,
            AggregationKind::Sum => sum,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AggregationKind::Avg => "AVG",
            AggregationKind::Sum => "SUM",
        }
    }
}

impl std::fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[inline]
fn project(kind: AggregationKind, count: f64, count_committed: f64) -> f64 {
    match kind {
        AggregationKind::Sum => count,
        AggregationKind::Avg => count / count_committed,
    }
}

/// AVG/SUM aggregation presenting the [`LossFunction`] interface to the
/// tree while forwarding to a child loss. Monomorphised over the child so
/// the CalcDiff loop has no dynamic dispatch.
#[derive(Debug)]
pub struct Aggregation<L> {
    kind: AggregationKind,
    child: L,
    /// Matches on the greater side per output row, for the current candidate.
    count1: Vec<f64>,
    /// Matches on the smaller side per output row, for the current candidate.
    count2: Vec<f64>,
    /// Total matches per output row as of the last commit.
    count_committed: Vec<f64>,
    /// Rows touched since the last commit, in insertion order.
    indices: IntSet,
    /// Rows touched by the current candidate.
    indices_current: IntSet,
    num_samples_1: f64,
    num_samples_2: f64,
}

impl<L: TerminalLoss> Aggregation<L> {
    /// `matches` is the tree's full match buffer, used to initialize
    /// `count_committed`.
    pub fn new(kind: AggregationKind, child: L, matches: &[Match], nrows: usize) -> Self {
        let mut count_committed = vec![0.0; nrows];
        for m in matches {
            count_committed[m.ix_output] += 1.0;
        }
        Aggregation {
            kind,
            child,
            count1: vec![0.0; nrows],
            count2: vec![0.0; nrows],
            count_committed,
            indices: IntSet::new(nrows),
            indices_current: IntSet::new(nrows),
            num_samples_1: 0.0,
            num_samples_2: 0.0,
        }
    }

    pub fn kind(&self) -> AggregationKind {
        self.kind
    }

    pub fn child(&self) -> &L {
        &self.child
    }

    pub fn count_committed(&self, ix: usize) -> f64 {
        self.count_committed[ix]
    }

    pub fn counts(&self, ix: usize) -> (f64, f64) {
        (self.count1[ix], self.count2[ix])
    }

    pub fn eta1(&self, ix: usize) -> f64 {
        if self.count1[ix] == 0.0 {
            return 0.0;
        }
        project(self.kind, self.count1[ix], self.count_committed[ix])
    }

    pub fn eta2(&self, ix: usize) -> f64 {
        if self.count2[ix] == 0.0 {
            return 0.0;
        }
        project(self.kind, self.count2[ix], self.count_committed[ix])
    }

    pub fn touched_rows(&self) -> &[usize] {
        self.indices.as_slice()
    }

    pub fn num_samples(&self) -> (f64, f64) {
        (self.num_samples_1, self.num_samples_2)
    }

    /// Moves one match of row `ix` in count space and reports the projected
    /// η mutation to the child.
    #[inline]
    fn bump(&mut self, ix: usize, d1: f64, d2: f64) {
        let cc = self.count_committed[ix];
        debug_assert!(cc > 0.0, "row reached by a match must have matches");
        let o1 = self.count1[ix];
        let o2 = self.count2[ix];
        let n1 = o1 + d1;
        let n2 = o2 + d2;
        debug_assert!(n1 >= 0.0 && n2 >= 0.0);
        self.child.eta_delta(
            ix,
            project(self.kind, o1, cc),
            project(self.kind, n1, cc),
            project(self.kind, o2, cc),
            project(self.kind, n2, cc),
        );
        self.count1[ix] = n1;
        self.count2[ix] = n2;
    }

    /// Recomputes the candidate state from scratch: `[split_begin,
    /// split_end)` goes to the greater side, the outer ranges to the
    /// smaller side.
    fn calc_all(
        &mut self,
        matches: &[Match],
        begin: usize,
        split_begin: usize,
        split_end: usize,
        end: usize,
    ) {
        self.restore_committed();

        for m in &matches[begin..split_begin] {
            self.bump(m.ix_output, 0.0, 1.0);
            self.indices.insert(m.ix_output);
            self.indices_current.insert(m.ix_output);
        }
        for m in &matches[split_begin..split_end] {
            self.bump(m.ix_output, 1.0, 0.0);
            self.indices.insert(m.ix_output);
            self.indices_current.insert(m.ix_output);
        }
        for m in &matches[split_end..end] {
            self.bump(m.ix_output, 0.0, 1.0);
            self.indices.insert(m.ix_output);
            self.indices_current.insert(m.ix_output);
        }

        self.num_samples_1 = (split_end - split_begin) as f64;
        self.num_samples_2 = ((split_begin - begin) + (end - split_end)) as f64;
    }

    /// Moves only the strip of matches that crossed the threshold since the
    /// previous candidate from the smaller to the greater side.
    fn calc_diff(&mut self, matches: &[Match], split_begin: usize, split_end: usize) {
        for m in &matches[split_begin..split_end] {
            self.bump(m.ix_output, 1.0, -1.0);
            self.indices.insert(m.ix_output);
            self.indices_current.insert(m.ix_output);
        }
        let dist = (split_end - split_begin) as f64;
        self.num_samples_1 += dist;
        self.num_samples_2 -= dist;
    }

    /// Zeroes the candidate state for every touched row. Because all η
    /// return to exactly zero, the child statistics are reset directly
    /// rather than through per-row deltas.
    fn restore_committed(&mut self) {
        let Aggregation {
            count1,
            count2,
            indices,
            ..
        } = self;
        for &ix in indices.iter() {
            count1[ix] = 0.0;
            count2[ix] = 0.0;
        }
        self.child.reset_stats();
        self.indices.clear();
        self.indices_current.clear();
        self.num_samples_1 = 0.0;
        self.num_samples_2 = 0.0;
    }
}

impl<L: TerminalLoss> LossFunction for Aggregation<L> {
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
    ) -> Vec<Weights> {
        match update {
            Update::CalcAll => self.calc_all(matches, begin, split_begin, split_end, end),
            Update::CalcDiff => {
                self.indices_current.clear();
                self.calc_diff(matches, split_begin, split_end);
            }
        }
        self.child.calc_weights(
            old_weight,
            self.num_samples_1,
            self.num_samples_2,
            min_num_samples,
        )
    }

    fn evaluate_split(&self, old_weight: f64, weights: &Weights) -> f64 {
        self.child.evaluate(old_weight, weights)
    }

    fn commit_split(
        &mut self,
        old_weight: f64,
        weights: &Weights,
        matches: &[Match],
        begin: usize,
        split: usize,
        end: usize,
    ) {
        // Rebuild the final partition state: greater side is [begin, split).
        self.calc_all(matches, begin, begin, split, end);

        let u1 = if weights.greater.is_nan() {
            0.0
        } else {
            weights.greater - old_weight
        };
        let u2 = if weights.smaller.is_nan() {
            0.0
        } else {
            weights.smaller - old_weight
        };

        // Fold the committed delta into the child residuals, then re-base.
        let Aggregation {
            kind,
            child,
            count1,
            count2,
            count_committed,
            indices,
            ..
        } = self;
        for &ix in indices.iter() {
            let cc = count_committed[ix];
            let delta =
                project(*kind, count1[ix], cc) * u1 + project(*kind, count2[ix], cc) * u2;
            child.fold_row(ix, delta);
            count1[ix] = 0.0;
            count2[ix] = 0.0;
        }
        child.set_intercept(weights.intercept);
        child.reset_stats();
        self.indices.clear();
        self.indices_current.clear();
        self.num_samples_1 = 0.0;
        self.num_samples_2 = 0.0;
    }

    fn commit(&mut self) {
        self.child.commit();
        self.restore_committed();
    }

    fn revert(&mut self, _old_weight: f64) {
        // Move the greater side of the current candidate back to the
        // smaller side, restoring the all-on-smaller baseline the
        // categorical first pass evaluates against.
        let mut moved = 0.0;
        for i in 0..self.indices_current.len() {
            let ix = self.indices_current.as_slice()[i];
            let c1 = self.count1[ix];
            if c1 != 0.0 {
                moved += c1;
                self.bump(ix, -c1, c1);
            }
        }
        self.num_samples_2 += moved;
        self.num_samples_1 -= moved;
        self.indices_current.clear();
    }

    fn revert_to_commit(&mut self) {
        self.restore_committed();
    }

    fn intercept(&self) -> f64 {
        self.child.intercept()
    }

    fn calc_update_rate(&self, predictions: &[f64]) -> f64 {
        self.child.calc_update_rate(predictions)
    }

    fn evaluate_tree(&self, update_rate: f64, predictions: &[f64]) -> f64 {
        self.child.evaluate_tree(update_rate, predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::SquareLoss;

    fn m(ix_output: usize, ix_input: usize) -> Match {
        Match { ix_output, ix_input }
    }

    fn avg_over(matches: &[Match], residuals: Vec<f64>) -> Aggregation<SquareLoss> {
        let nrows = residuals.len();
        Aggregation::new(
            AggregationKind::Avg,
            SquareLoss::new(residuals, 0.0),
            matches,
            nrows,
        )
    }

    #[test]
    fn test_count_committed_initialization() {
        let matches = vec![m(0, 0), m(0, 1), m(2, 2)];
        let agg = avg_over(&matches, vec![0.0, 0.0, 0.0]);
        assert_eq!(agg.count_committed(0), 2.0);
        assert_eq!(agg.count_committed(1), 0.0);
        assert_eq!(agg.count_committed(2), 1.0);
    }

    #[test]
    fn test_count_conservation() {
        let matches = vec![m(0, 0), m(0, 1), m(0, 2), m(1, 3)];
        let mut agg = avg_over(&matches, vec![1.0, 1.0]);

        agg.calc_weights(Update::CalcAll, 1.0, 0.0, &matches, 0, 0, 2, 4);
        for &ix in agg.touched_rows() {
            let (c1, c2) = agg.counts(ix);
            assert_eq!(c1 + c2, agg.count_committed(ix));
        }

        agg.calc_weights(Update::CalcDiff, 1.0, 0.0, &matches, 0, 2, 3, 4);
        for &ix in agg.touched_rows() {
            let (c1, c2) = agg.counts(ix);
            assert_eq!(c1 + c2, agg.count_committed(ix));
        }
    }

    #[test]
    fn test_calc_all_vs_calc_diff_bit_equal() {
        let matches = vec![m(0, 0), m(0, 1), m(0, 2), m(1, 3), m(1, 4)];
        let residuals = vec![2.0, -1.0];

        // Path A: single CalcAll with greater side [0, 3).
        let mut all = avg_over(&matches, residuals.clone());
        all.calc_weights(Update::CalcAll, 1.0, 0.0, &matches, 0, 0, 3, 5);

        // Path B: CalcAll with greater side [0, 1), then two CalcDiffs.
        let mut diff = avg_over(&matches, residuals);
        diff.calc_weights(Update::CalcAll, 1.0, 0.0, &matches, 0, 0, 1, 5);
        diff.calc_weights(Update::CalcDiff, 1.0, 0.0, &matches, 0, 1, 2, 5);
        diff.calc_weights(Update::CalcDiff, 1.0, 0.0, &matches, 0, 2, 3, 5);

        for ix in 0..2 {
            assert_eq!(all.eta1(ix).to_bits(), diff.eta1(ix).to_bits());
            assert_eq!(all.eta2(ix).to_bits(), diff.eta2(ix).to_bits());
        }
        assert_eq!(all.num_samples(), diff.num_samples());
    }

    #[test]
    fn test_revert_restores_baseline() {
        let matches = vec![m(0, 0), m(0, 1), m(1, 2)];
        let mut agg = avg_over(&matches, vec![1.0, -1.0]);

        // Baseline: everything on the smaller side.
        agg.calc_weights(Update::CalcAll, 1.0, 0.0, &matches, 0, 0, 0, 3);
        let baseline: Vec<(f64, f64)> = (0..2).map(|ix| agg.counts(ix)).collect();

        agg.calc_weights(Update::CalcDiff, 1.0, 0.0, &matches, 0, 0, 2, 3);
        agg.revert(0.0);

        let restored: Vec<(f64, f64)> = (0..2).map(|ix| agg.counts(ix)).collect();
        assert_eq!(baseline, restored);
        assert_eq!(agg.num_samples(), (0.0, 3.0));
    }

    #[test]
    fn test_revert_to_commit_restores_zero_baseline() {
        let matches = vec![m(0, 0), m(1, 1)];
        let mut agg = avg_over(&matches, vec![1.0, 2.0]);

        agg.calc_weights(Update::CalcAll, 1.0, 0.0, &matches, 0, 0, 1, 2);
        agg.calc_weights(Update::CalcDiff, 1.0, 0.0, &matches, 0, 1, 2, 2);
        agg.revert_to_commit();

        for ix in 0..2 {
            assert_eq!(agg.counts(ix), (0.0, 0.0));
        }
        assert!(agg.touched_rows().is_empty());
        assert_eq!(agg.num_samples(), (0.0, 0.0));
    }

    #[test]
    fn test_commit_is_idempotent() {
        let matches = vec![m(0, 0), m(1, 1)];
        let mut agg = avg_over(&matches, vec![1.0, 2.0]);
        agg.calc_weights(Update::CalcAll, 1.0, 0.0, &matches, 0, 0, 1, 2);

        agg.commit();
        let counts: Vec<(f64, f64)> = (0..2).map(|ix| agg.counts(ix)).collect();
        let touched = agg.touched_rows().to_vec();

        agg.commit();
        assert_eq!(counts, (0..2).map(|ix| agg.counts(ix)).collect::<Vec<_>>());
        assert_eq!(touched, agg.touched_rows().to_vec());
    }

    #[test]
    fn test_commit_split_folds_residuals() {
        // One row, one match, residual 2.0, AVG: committing w1 = 2 should
        // absorb the whole residual.
        let matches = vec![m(0, 0)];
        let mut agg = avg_over(&matches, vec![2.0]);

        let weights = agg.calc_weights(Update::CalcAll, 1.0, 0.0, &matches, 0, 0, 1, 1);
        let best = weights[0];
        assert!((best.greater - 2.0).abs() < 1e-12);

        agg.commit_split(0.0, &best, &matches, 0, 1, 1);
        assert!(agg.child().residual(0).abs() < 1e-12);
        assert_eq!(agg.counts(0), (0.0, 0.0));
    }

    #[test]
    fn test_sum_semantics() {
        // SUM: eta is the raw count, so three matches on the greater side
        // of one row give eta1 = 3.
        let matches = vec![m(0, 0), m(0, 1), m(0, 2)];
        let mut agg = Aggregation::new(
            AggregationKind::Sum,
            SquareLoss::new(vec![6.0], 0.0),
            &matches,
            1,
        );

        let weights = agg.calc_weights(Update::CalcAll, 1.0, 0.0, &matches, 0, 0, 3, 3);
        assert_eq!(agg.eta1(0), 3.0);
        // yhat = 3 * w1 must equal 6, so w1 = 2.
        assert!((weights[0].greater - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_aggregate_transform() {
        assert_eq!(AggregationKind::Avg.aggregate(&[1.0, 3.0]), 2.0);
        assert_eq!(AggregationKind::Sum.aggregate(&[1.0, 3.0]), 4.0);
        assert_eq!(AggregationKind::Avg.aggregate(&[1.0, f64::NAN, 3.0]), 2.0);
        assert!(AggregationKind::Avg.aggregate(&[]).is_nan());
        assert!(AggregationKind::Sum.aggregate(&[f64::NAN]).is_nan());
    }
}
