//! Recursive decision-tree node.
//!
//! `fit` enumerates every candidate split across all data-used categories,
//! scores each one through the loss chain and takes the best if its loss
//! reduction clears `gamma`. Enumeration follows a rigid template per
//! column: move NaN matches to the end, sort descending, walk the critical
//! values front-to-back so the first candidate recomputes from scratch
//! (CalcAll) and every later one only moves the strip of matches that
//! crossed the threshold (CalcDiff). Categorical columns get two passes:
//! each single category against the rest, then prefixes of the categories
//! sorted by their first-pass weight (the optimal-partition ordering of
//! Breiman et al., valid for convex per-side losses).

use crate::containers::{CategoryIndex, DataFrame, Match};
use crate::error::{Error, Result};
use crate::hyperparameters::Hyperparameters;
use crate::loss::{LossFunction, Revert, Update};
use crate::trees::critical_values;
use crate::trees::partition::{
    is_greater, numeric_value, partition_by_split, partition_nan_to_end, sort_by_category,
    sort_descending,
};
use crate::trees::split::{CandidateSplit, DataUsed, Split};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Everything a node needs while fitting, bundled so the recursion does not
/// thread six arguments through every call.
pub struct FitCtx<'a, L> {
    pub output: &'a DataFrame,
    pub input: &'a DataFrame,
    pub hyp: &'a Hyperparameters,
    pub loss: &'a mut L,
    pub intercept: f64,
}

/// A node is either a leaf holding a scalar weight or an internal node
/// holding a split and two children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTreeNode {
    depth: usize,
    weight: f64,
    split: Option<Split>,
    child_greater: Option<Box<DecisionTreeNode>>,
    child_smaller: Option<Box<DecisionTreeNode>>,
}

impl DecisionTreeNode {
    pub fn new(depth: usize, weight: f64) -> Self {
        DecisionTreeNode {
            depth,
            weight,
            split: None,
            child_greater: None,
            child_smaller: None,
        }
    }

    pub fn root() -> Self {
        DecisionTreeNode::new(0, 0.0)
    }

    pub fn is_leaf(&self) -> bool {
        self.child_greater.is_none()
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn split(&self) -> Option<&Split> {
        self.split.as_ref()
    }

    pub fn child_greater(&self) -> Option<&DecisionTreeNode> {
        self.child_greater.as_deref()
    }

    pub fn child_smaller(&self) -> Option<&DecisionTreeNode> {
        self.child_smaller.as_deref()
    }

    /// Number of nodes in the subtree, for diagnostics.
    pub fn num_nodes(&self) -> usize {
        1 + self
            .child_greater
            .as_ref()
            .map_or(0, |c| c.num_nodes())
            + self.child_smaller.as_ref().map_or(0, |c| c.num_nodes())
    }

    /// Fits the subtree over `matches[begin..end)`.
    pub fn fit<L: LossFunction>(
        &mut self,
        ctx: &mut FitCtx<'_, L>,
        matches: &mut [Match],
        begin: usize,
        end: usize,
    ) -> Result<()> {
        if self.depth >= ctx.hyp.max_depth || begin == end {
            return Ok(());
        }

        let candidates = self.try_all(ctx, matches, begin, end)?;
        if candidates.is_empty() {
            return Ok(());
        }

        // Maximum loss reduction, first-wins on ties so fits replay
        // bit-identically.
        let mut best = &candidates[0];
        for c in &candidates[1..] {
            if c.loss_reduction > best.loss_reduction {
                best = c;
            }
        }

        debug!(
            depth = self.depth,
            loss_reduction = best.loss_reduction,
            data_used = ?best.split.data_used,
            "best candidate"
        );

        if best.loss_reduction < ctx.hyp.gamma {
            return Ok(());
        }

        let best = best.clone();
        let pivot = partition_by_split(&best.split, ctx.input, ctx.output, matches, begin, end);
        debug_assert!(
            matches[begin..pivot]
                .iter()
                .all(|m| is_greater(&best.split, ctx.input, ctx.output, m))
                && matches[pivot..end]
                    .iter()
                    .all(|m| !is_greater(&best.split, ctx.input, ctx.output, m)),
            "partition must close over the split predicate"
        );

        ctx.loss
            .commit_split(self.weight, &best.weights, matches, begin, pivot, end);
        ctx.intercept = best.weights.intercept;

        let w_greater = if best.weights.greater.is_nan() {
            self.weight
        } else {
            best.weights.greater
        };
        let w_smaller = if best.weights.smaller.is_nan() {
            self.weight
        } else {
            best.weights.smaller
        };

        let mut greater = DecisionTreeNode::new(self.depth + 1, w_greater);
        let mut smaller = DecisionTreeNode::new(self.depth + 1, w_smaller);
        greater.fit(ctx, matches, begin, pivot)?;
        smaller.fit(ctx, matches, pivot, end)?;

        self.split = Some(best.split);
        self.child_greater = Some(Box::new(greater));
        self.child_smaller = Some(Box::new(smaller));
        Ok(())
    }

    /// The leaf weight a single match lands on.
    pub fn transform(&self, output: &DataFrame, input: &DataFrame, m: &Match) -> f64 {
        match (&self.split, &self.child_greater, &self.child_smaller) {
            (Some(split), Some(greater), Some(smaller)) => {
                if is_greater(split, input, output, m) {
                    greater.transform(output, input, m)
                } else {
                    smaller.transform(output, input, m)
                }
            }
            _ => self.weight,
        }
    }

    // -----------------------------------------------------------------
    // Candidate enumeration

    fn try_all<L: LossFunction>(
        &self,
        ctx: &mut FitCtx<'_, L>,
        matches: &mut [Match],
        begin: usize,
        end: usize,
    ) -> Result<Vec<CandidateSplit>> {
        let mut candidates = Vec::new();

        for col in 0..ctx.input.categoricals().len() {
            self.try_categorical(
                ctx,
                matches,
                begin,
                end,
                DataUsed::CategoricalInput,
                col,
                &mut candidates,
            )?;
        }
        for col in 0..ctx.output.categoricals().len() {
            self.try_categorical(
                ctx,
                matches,
                begin,
                end,
                DataUsed::CategoricalOutput,
                col,
                &mut candidates,
            )?;
        }

        for col in 0..ctx.input.discretes().len() {
            self.try_numeric(
                ctx,
                matches,
                begin,
                end,
                Split::numeric(DataUsed::DiscreteInput, col, f64::NAN),
                Some(DataUsed::DiscreteInputIsNan),
                &mut candidates,
            )?;
        }
        for col in 0..ctx.output.discretes().len() {
            self.try_numeric(
                ctx,
                matches,
                begin,
                end,
                Split::numeric(DataUsed::DiscreteOutput, col, f64::NAN),
                Some(DataUsed::DiscreteOutputIsNan),
                &mut candidates,
            )?;
        }

        for col in 0..ctx.input.numericals().len() {
            self.try_numeric(
                ctx,
                matches,
                begin,
                end,
                Split::numeric(DataUsed::NumericalInput, col, f64::NAN),
                Some(DataUsed::NumericalInputIsNan),
                &mut candidates,
            )?;
        }
        for col in 0..ctx.output.numericals().len() {
            self.try_numeric(
                ctx,
                matches,
                begin,
                end,
                Split::numeric(DataUsed::NumericalOutput, col, f64::NAN),
                Some(DataUsed::NumericalOutputIsNan),
                &mut candidates,
            )?;
        }

        self.try_same_units_categorical(ctx, matches, begin, end, &mut candidates)?;

        for (out_col, in_col) in same_unit_pairs(ctx.output.discretes(), ctx.input.discretes()) {
            self.try_numeric(
                ctx,
                matches,
                begin,
                end,
                Split::same_units(DataUsed::SameUnitsDiscrete, out_col, in_col, f64::NAN),
                Some(DataUsed::SameUnitsDiscreteIsNan),
                &mut candidates,
            )?;
        }
        for (out_col, in_col) in same_unit_pairs(ctx.output.numericals(), ctx.input.numericals()) {
            self.try_numeric(
                ctx,
                matches,
                begin,
                end,
                Split::same_units(DataUsed::SameUnitsNumerical, out_col, in_col, f64::NAN),
                Some(DataUsed::SameUnitsNumericalIsNan),
                &mut candidates,
            )?;
        }

        if !ctx.input.time_stamps().is_empty() && !ctx.output.time_stamps().is_empty() {
            self.try_numeric(
                ctx,
                matches,
                begin,
                end,
                Split::numeric(DataUsed::TimeStampsDiff, 0, f64::NAN),
                None,
                &mut candidates,
            )?;
        }

        Ok(candidates)
    }

    /// Scores one candidate: computes the weight triplets, evaluates each,
    /// and optionally undoes the candidate's delta.
    fn add_candidates<L: LossFunction>(
        &self,
        ctx: &mut FitCtx<'_, L>,
        revert: Revert,
        update: Update,
        split: &Split,
        matches: &[Match],
        begin: usize,
        last_it: usize,
        it: usize,
        end: usize,
        candidates: &mut Vec<CandidateSplit>,
    ) -> Result<()> {
        let all_weights = ctx.loss.calc_weights(
            update,
            ctx.hyp.min_num_samples,
            self.weight,
            matches,
            begin,
            last_it,
            it,
            end,
        );

        for weights in all_weights {
            if weights.has_infinite() {
                return Err(Error::Internal(format!(
                    "infinite weight for candidate {:?}",
                    split.data_used
                )));
            }
            if !weights.is_feasible() {
                continue;
            }
            if weights.greater.is_nan() && weights.smaller.is_nan() {
                continue;
            }
            let loss_reduction = ctx.loss.evaluate_split(self.weight, &weights);
            candidates.push(CandidateSplit {
                loss_reduction,
                split: split.clone(),
                weights,
            });
        }

        if revert == Revert::True {
            ctx.loss.revert(self.weight);
        }
        Ok(())
    }

    /// The template shared by every numeric variant: NaN partition,
    /// descending sort, CalcAll on the first critical value, CalcDiff on
    /// the rest, an optional is-NaN candidate, revert.
    fn try_numeric<L: LossFunction>(
        &self,
        ctx: &mut FitCtx<'_, L>,
        matches: &mut [Match],
        begin: usize,
        end: usize,
        probe: Split,
        nan_variant: Option<DataUsed>,
        candidates: &mut Vec<CandidateSplit>,
    ) -> Result<()> {
        let (output, input) = (ctx.output, ctx.input);
        let value = |m: &Match| numeric_value(&probe, input, output, m);

        let nan_begin = partition_nan_to_end(matches, begin, end, value);
        sort_descending(matches, begin, nan_begin, value);

        let cvs = critical_values::calc_numeric(
            matches,
            begin,
            nan_begin,
            ctx.hyp.max_critical_values,
            value,
        );
        if cvs.len() <= 1 {
            return Ok(());
        }

        let mut it = begin;
        let mut last_it = begin;
        for (i, &cv) in cvs.iter().enumerate() {
            it = crate::trees::partition::next_split(matches, it, nan_begin, cv, value);
            let update = if i == 0 { Update::CalcAll } else { Update::CalcDiff };
            let split = Split { critical_value: cv, ..probe.clone() };
            self.add_candidates(
                ctx,
                Revert::False,
                update,
                &split,
                matches,
                begin,
                last_it,
                it,
                end,
                candidates,
            )?;
            last_it = it;
        }

        if let Some(data_used) = nan_variant {
            let split = Split { data_used, critical_value: 0.0, ..probe.clone() };
            self.add_candidates(
                ctx,
                Revert::False,
                Update::CalcDiff,
                &split,
                matches,
                begin,
                last_it,
                nan_begin,
                end,
                candidates,
            )?;
        }

        ctx.loss.revert_to_commit();
        Ok(())
    }

    /// Two-pass categorical enumeration.
    fn try_categorical<L: LossFunction>(
        &self,
        ctx: &mut FitCtx<'_, L>,
        matches: &mut [Match],
        begin: usize,
        end: usize,
        data_used: DataUsed,
        column: usize,
        candidates: &mut Vec<CandidateSplit>,
    ) -> Result<()> {
        let (output, input) = (ctx.output, ctx.input);
        let value = |m: &Match| -> i64 {
            match data_used {
                DataUsed::CategoricalInput => input.categoricals()[column].get(m.ix_input),
                DataUsed::CategoricalOutput => output.categoricals()[column].get(m.ix_output),
                _ => unreachable!("not a categorical variant"),
            }
        };

        sort_by_category(matches, begin, end, value);
        let cvs = critical_values::calc_categorical(matches, begin, end, value);
        if cvs.len() <= 1 {
            return Ok(());
        }
        let index = CategoryIndex::build(matches, begin, end, value);

        // First pass: each category against the rest, independently from
        // the all-on-smaller baseline.
        let begin_ix = candidates.len();
        for (i, &cv) in cvs.iter().enumerate() {
            let (cat_begin, cat_end) = index.range(cv);
            let update = if i == 0 { Update::CalcAll } else { Update::CalcDiff };
            let split = Split::categorical(data_used, column, vec![cv]);
            self.add_candidates(
                ctx,
                Revert::True,
                update,
                &split,
                matches,
                begin,
                cat_begin,
                cat_end,
                end,
                candidates,
            )?;
        }

        // Second pass: prefixes of the categories ordered by their
        // first-pass greater-side weight.
        let sorted = sort_categories_by_weight(&candidates[begin_ix..]);
        for (i, &cv) in sorted.iter().enumerate() {
            let (cat_begin, cat_end) = index.range(cv);
            let update = if i == 0 { Update::CalcAll } else { Update::CalcDiff };
            let split = Split::categorical(data_used, column, sorted[..=i].to_vec());
            self.add_candidates(
                ctx,
                Revert::False,
                update,
                &split,
                matches,
                begin,
                cat_begin,
                cat_end,
                end,
                candidates,
            )?;
        }

        ctx.loss.revert_to_commit();
        Ok(())
    }

    /// One candidate per equal-unit categorical pair: matches whose input
    /// and output categories agree go to the greater branch.
    fn try_same_units_categorical<L: LossFunction>(
        &self,
        ctx: &mut FitCtx<'_, L>,
        matches: &mut [Match],
        begin: usize,
        end: usize,
        candidates: &mut Vec<CandidateSplit>,
    ) -> Result<()> {
        let pairs: Vec<(usize, usize)> =
            same_unit_pairs(ctx.output.categoricals(), ctx.input.categoricals());
        for (out_col, in_col) in pairs {
            let split =
                Split::same_units(DataUsed::SameUnitsCategorical, out_col, in_col, f64::NAN);
            let pivot =
                partition_by_split(&split, ctx.input, ctx.output, matches, begin, end);
            self.add_candidates(
                ctx,
                Revert::False,
                Update::CalcAll,
                &split,
                matches,
                begin,
                begin,
                pivot,
                end,
                candidates,
            )?;
            ctx.loss.revert_to_commit();
        }
        Ok(())
    }
}

/// (output column, input column) pairs whose units are equal, non-empty and
/// not flagged comparison-only.
fn same_unit_pairs<T>(
    output_cols: &[crate::containers::Column<T>],
    input_cols: &[crate::containers::Column<T>],
) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for (out_col, oc) in output_cols.iter().enumerate() {
        if oc.unit().is_empty() || oc.is_comparison_only() {
            continue;
        }
        for (in_col, ic) in input_cols.iter().enumerate() {
            if ic.unit() == oc.unit() && !ic.is_comparison_only() {
                pairs.push((out_col, in_col));
            }
        }
    }
    pairs
}

/// Extracts, per category, the greater-side weight of its best first-pass
/// candidate and returns the categories sorted by that weight in descending
/// order (category id breaks ties, for determinism).
fn sort_categories_by_weight(first_pass: &[CandidateSplit]) -> Vec<i64> {
    let mut best: Vec<(i64, f64, f64)> = Vec::new();
    for c in first_pass {
        let cat = c.split.categories[0];
        let w = c.weights.greater;
        if w.is_nan() {
            continue;
        }
        match best.iter_mut().find(|(b_cat, _, _)| *b_cat == cat) {
            Some(entry) if c.loss_reduction > entry.2 => *entry = (cat, w, c.loss_reduction),
            Some(_) => {}
            None => best.push((cat, w, c.loss_reduction)),
        }
    }
    best.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    best.into_iter().map(|(cat, _, _)| cat).collect()
}
