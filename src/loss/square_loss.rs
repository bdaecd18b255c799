//! Terminal square loss over the output (population) rows.
//!
//! The loss keeps the per-row residuals plus a handful of running sums over
//! the η statistics the aggregation projects into it:
//!
//! ```text
//! s1  = Σ η1[i]          s2  = Σ η2[i]
//! s11 = Σ η1[i]²         s22 = Σ η2[i]²        s12 = Σ η1[i]·η2[i]
//! g1  = Σ η1[i]·g[i]     g2  = Σ η2[i]·g[i]
//! ```
//!
//! The aggregation reports every η mutation through [`SquareLoss::eta_delta`],
//! so enumerating K candidate splits costs O(matches) total instead of
//! O(K · matches). Candidate weights are solved in update space
//! (`u = w - old_weight`): first the 2x2 ridge system for (u1, u2), then the
//! intercept re-solve given those weights. The joint 3x3 system is singular
//! for degenerate nodes, the sequential form is always well-posed.

use crate::loss::Weights;

/// Determinant threshold below which the joint 2x2 solve is skipped.
const SINGULARITY_EPS: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct SquareLoss {
    /// Residuals net of committed split deltas (the intercept is tracked
    /// separately so that split commits stay O(|indices|)).
    g: Vec<f64>,
    /// Residual snapshot from construction, used for the update-rate line
    /// search after the tree is fitted.
    g0: Vec<f64>,
    /// Committed tree intercept.
    intercept: f64,
    reg_lambda: f64,
    sum_g: f64,
    nrows: f64,
    s1: f64,
    s2: f64,
    s11: f64,
    s12: f64,
    s22: f64,
    g1: f64,
    g2: f64,
}

impl SquareLoss {
    /// `residuals[i]` is the target minus the committed ensemble prediction
    /// for output row `i`.
    pub fn new(residuals: Vec<f64>, reg_lambda: f64) -> Self {
        let sum_g = residuals.iter().sum();
        let nrows = residuals.len() as f64;
        SquareLoss {
            g0: residuals.clone(),
            g: residuals,
            intercept: 0.0,
            reg_lambda,
            sum_g,
            nrows,
            s1: 0.0,
            s2: 0.0,
            s11: 0.0,
            s12: 0.0,
            s22: 0.0,
            g1: 0.0,
            g2: 0.0,
        }
    }

    pub fn nrows(&self) -> usize {
        self.g.len()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn residual(&self, ix: usize) -> f64 {
        self.g[ix]
    }

    /// The aggregation calls this once per η mutation. `old`/`new` are the
    /// projected values before and after the mutation.
    #[inline]
    pub fn eta_delta(&mut self, ix: usize, old1: f64, new1: f64, old2: f64, new2: f64) {
        let g = self.g[ix];
        self.s1 += new1 - old1;
        self.s2 += new2 - old2;
        self.s11 += new1 * new1 - old1 * old1;
        self.s22 += new2 * new2 - old2 * old2;
        self.s12 += new1 * new2 - old1 * old2;
        self.g1 += (new1 - old1) * g;
        self.g2 += (new2 - old2) * g;
    }

    /// Zeroes the η statistics. Valid only when the aggregation has just
    /// zeroed every touched row's counts, which makes the exact sums zero.
    pub fn reset_stats(&mut self) {
        self.s1 = 0.0;
        self.s2 = 0.0;
        self.s11 = 0.0;
        self.s12 = 0.0;
        self.s22 = 0.0;
        self.g1 = 0.0;
        self.g2 = 0.0;
    }

    /// Folds a committed split delta into row `ix`.
    #[inline]
    pub fn fold_row(&mut self, ix: usize, delta: f64) {
        self.g[ix] -= delta;
        self.sum_g -= delta;
    }

    pub fn set_intercept(&mut self, intercept: f64) {
        self.intercept = intercept;
    }

    /// Effective statistics against the residual net of the committed
    /// intercept: `r[i] = g[i] - intercept`.
    fn effective(&self) -> (f64, f64, f64) {
        let t = self.intercept;
        (
            self.sum_g - self.nrows * t,
            self.g1 - t * self.s1,
            self.g2 - t * self.s2,
        )
    }

    /// Up to three closed-form triplets: joint, greater-only, smaller-only.
    /// `num_samples_1`/`num_samples_2` gate the triplets per the balance
    /// rule.
    pub fn calc_weights(
        &self,
        old_weight: f64,
        num_samples_1: f64,
        num_samples_2: f64,
        min_num_samples: f64,
    ) -> Vec<Weights> {
        let (sg, g1, g2) = self.effective();
        let lambda = self.reg_lambda;
        let mut results = Vec::with_capacity(3);

        if num_samples_1 >= min_num_samples && num_samples_2 >= min_num_samples {
            let a11 = self.s11 + lambda;
            let a22 = self.s22 + lambda;
            let det = a11 * a22 - self.s12 * self.s12;
            if det.abs() > SINGULARITY_EPS * a11.max(a22).max(1.0) {
                let u1 = (g1 * a22 - g2 * self.s12) / det;
                let u2 = (g2 * a11 - g1 * self.s12) / det;
                let dt = (sg - self.s1 * u1 - self.s2 * u2) / self.nrows;
                results.push(Weights {
                    intercept: self.intercept + dt,
                    greater: old_weight + u1,
                    smaller: old_weight + u2,
                });
            }
        }

        if num_samples_1 >= min_num_samples && self.s11 + lambda > 0.0 {
            let u1 = g1 / (self.s11 + lambda);
            let dt = (sg - self.s1 * u1) / self.nrows;
            results.push(Weights {
                intercept: self.intercept + dt,
                greater: old_weight + u1,
                smaller: f64::NAN,
            });
        }

        if num_samples_2 >= min_num_samples && self.s22 + lambda > 0.0 {
            let u2 = g2 / (self.s22 + lambda);
            let dt = (sg - self.s2 * u2) / self.nrows;
            results.push(Weights {
                intercept: self.intercept + dt,
                greater: f64::NAN,
                smaller: old_weight + u2,
            });
        }

        results
    }

    /// The (unpenalized) loss reduction of applying `weights` to the
    /// current candidate partition. Pure in the statistics.
    pub fn evaluate(&self, old_weight: f64, weights: &Weights) -> f64 {
        let (sg, g1, g2) = self.effective();
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
        let dt = weights.intercept - self.intercept;

        2.0 * (dt * sg + u1 * g1 + u2 * g2)
            - (self.nrows * dt * dt
                + self.s11 * u1 * u1
                + self.s22 * u2 * u2
                + 2.0 * dt * (u1 * self.s1 + u2 * self.s2)
                + 2.0 * u1 * u2 * self.s12)
    }

    /// The terminal loss has no per-row pending state of its own: split
    /// deltas are folded eagerly by `fold_row`.
    pub fn commit(&mut self) {}

    /// Closed-form line search: argmin_r Σ (g0[i] - r·p[i])². NaN
    /// predictions (rows without matches) contribute nothing.
    pub fn calc_update_rate(&self, predictions: &[f64]) -> f64 {
        let mut num = 0.0;
        let mut denom = 0.0;
        for (ix, &p) in predictions.iter().enumerate() {
            if p.is_nan() {
                continue;
            }
            num += self.g0[ix] * p;
            denom += p * p;
        }
        if denom > 0.0 {
            num / denom
        } else {
            0.0
        }
    }

    /// Loss reduction of adding `update_rate * predictions` to the
    /// committed prediction: `2·r·Σg0·p - r²·Σp²`.
    pub fn evaluate_tree(&self, update_rate: f64, predictions: &[f64]) -> f64 {
        let mut num = 0.0;
        let mut denom = 0.0;
        for (ix, &p) in predictions.iter().enumerate() {
            if p.is_nan() {
                continue;
            }
            num += self.g0[ix] * p;
            denom += p * p;
        }
        2.0 * update_rate * num - update_rate * update_rate * denom
    }
}

impl crate::loss::TerminalLoss for SquareLoss {
    #[inline]
    fn eta_delta(&mut self, ix: usize, old1: f64, new1: f64, old2: f64, new2: f64) {
        SquareLoss::eta_delta(self, ix, old1, new1, old2, new2);
    }

    fn reset_stats(&mut self) {
        SquareLoss::reset_stats(self);
    }

    #[inline]
    fn fold_row(&mut self, ix: usize, delta: f64) {
        SquareLoss::fold_row(self, ix, delta);
    }

    fn set_intercept(&mut self, intercept: f64) {
        SquareLoss::set_intercept(self, intercept);
    }

    fn intercept(&self) -> f64 {
        SquareLoss::intercept(self)
    }

    fn calc_weights(
        &self,
        old_weight: f64,
        num_samples_1: f64,
        num_samples_2: f64,
        min_num_samples: f64,
    ) -> Vec<Weights> {
        SquareLoss::calc_weights(self, old_weight, num_samples_1, num_samples_2, min_num_samples)
    }

    fn evaluate(&self, old_weight: f64, weights: &Weights) -> f64 {
        SquareLoss::evaluate(self, old_weight, weights)
    }

    fn commit(&mut self) {
        SquareLoss::commit(self);
    }

    fn calc_update_rate(&self, predictions: &[f64]) -> f64 {
        SquareLoss::calc_update_rate(self, predictions)
    }

    fn evaluate_tree(&self, update_rate: f64, predictions: &[f64]) -> f64 {
        SquareLoss::evaluate_tree(self, update_rate, predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_match_weight() {
        // One output row with residual 2.0, one match on the greater side
        // of an AVG aggregation: eta1 goes 0 -> 1.
        let mut loss = SquareLoss::new(vec![2.0], 0.0);
        loss.eta_delta(0, 0.0, 1.0, 0.0, 0.0);

        let weights = loss.calc_weights(0.0, 1.0, 0.0, 1.0);
        assert_eq!(weights.len(), 1);
        assert!((weights[0].greater - 2.0).abs() < 1e-12);
        assert!(weights[0].smaller.is_nan());
        assert!((weights[0].intercept).abs() < 1e-12);

        // Applying the optimal weight removes the entire squared error.
        let reduction = loss.evaluate(0.0, &weights[0]);
        assert!((reduction - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_joint_solve() {
        // Two rows: row 0 entirely on the greater side, row 1 on the
        // smaller side. Residuals 3 and -1.
        let mut loss = SquareLoss::new(vec![3.0, -1.0], 0.0);
        loss.eta_delta(0, 0.0, 1.0, 0.0, 0.0);
        loss.eta_delta(1, 0.0, 0.0, 0.0, 1.0);

        let weights = loss.calc_weights(0.0, 1.0, 1.0, 1.0);
        let joint = weights[0];
        assert!((joint.greater - 3.0).abs() < 1e-12);
        assert!((joint.smaller + 1.0).abs() < 1e-12);
        // Residuals fully explained: intercept delta is zero.
        assert!(joint.intercept.abs() < 1e-12);

        let reduction = loss.evaluate(0.0, &joint);
        assert!((reduction - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_regularization_shrinks_weights() {
        let mut plain = SquareLoss::new(vec![2.0], 0.0);
        plain.eta_delta(0, 0.0, 1.0, 0.0, 0.0);
        let mut ridge = SquareLoss::new(vec![2.0], 1.0);
        ridge.eta_delta(0, 0.0, 1.0, 0.0, 0.0);

        let w_plain = plain.calc_weights(0.0, 1.0, 0.0, 1.0)[0].greater;
        let w_ridge = ridge.calc_weights(0.0, 1.0, 0.0, 1.0)[0].greater;
        assert!(w_ridge.abs() < w_plain.abs());
        assert!((w_ridge - 1.0).abs() < 1e-12); // 2 / (1 + 1)
    }

    #[test]
    fn test_balance_rule_gates_triplets() {
        let mut loss = SquareLoss::new(vec![1.0, 1.0], 0.0);
        loss.eta_delta(0, 0.0, 1.0, 0.0, 0.0);
        loss.eta_delta(1, 0.0, 0.0, 0.0, 1.0);

        // min_num_samples = 2 rejects everything: each side has one sample.
        let weights = loss.calc_weights(0.0, 1.0, 1.0, 2.0);
        assert!(weights.is_empty());
    }

    #[test]
    fn test_update_rate_line_search() {
        let loss = SquareLoss::new(vec![2.0, 4.0], 0.0);
        // Perfect predictor at rate 2.
        let rate = loss.calc_update_rate(&[1.0, 2.0]);
        assert!((rate - 2.0).abs() < 1e-12);

        // Loss reduction at the optimum equals the full squared error.
        let reduction = loss.evaluate_tree(rate, &[1.0, 2.0]);
        assert!((reduction - 20.0).abs() < 1e-12);

        // NaN predictions are skipped.
        let rate = loss.calc_update_rate(&[1.0, f64::NAN]);
        assert!((rate - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_fold_updates_residuals() {
        let mut loss = SquareLoss::new(vec![2.0, 3.0], 0.0);
        loss.fold_row(1, 3.0);
        assert_eq!(loss.residual(1), 0.0);
        // g0 is untouched by folds.
        let rate = loss.calc_update_rate(&[0.0, 1.0]);
        assert!((rate - 3.0).abs() < 1e-12);
    }
}
