//! The boosting driver.
//!
//! Trees are added in strictly serial order. Every iteration builds a fresh
//! match buffer and a fresh loss chain over the current residuals, fits one
//! tree, line-searches its update rate, and folds `rate * prediction` into
//! the running prediction. Boosting stops early when a tree's evaluated
//! reduction falls below the absolute floor or the score fails to improve
//! for `early_stopping_rounds` consecutive trees.

use crate::aggregations::{Aggregation, AggregationKind};
use crate::containers::{DataFrame, MatchMaker};
use crate::error::{Error, Result};
use crate::hyperparameters::Hyperparameters;
use crate::loss::{LossFunction, SquareLoss};
use crate::trees::node::{DecisionTreeNode, FitCtx};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One fitted tree: the recursive node structure plus the aggregation it
/// was trained under and its peripheral binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: DecisionTreeNode,
    kind: AggregationKind,
    peripheral_ix: usize,
    intercept: f64,
    update_rate: f64,
}

impl DecisionTree {
    pub fn kind(&self) -> AggregationKind {
        self.kind
    }

    pub fn peripheral_ix(&self) -> usize {
        self.peripheral_ix
    }

    pub fn update_rate(&self) -> f64 {
        self.update_rate
    }

    pub fn root(&self) -> &DecisionTreeNode {
        &self.root
    }

    /// The raw aggregated output for one population row: the AVG/SUM of the
    /// leaf weights of the row's matches. NaN when the row has no matches.
    pub fn feature_value(
        &self,
        population: &DataFrame,
        peripheral: &DataFrame,
        row: usize,
        use_timestamps: bool,
    ) -> Result<f64> {
        let matches =
            MatchMaker::matches_for_row(population, peripheral, row, use_timestamps)?;
        let weights: Vec<f64> = matches
            .iter()
            .map(|m| self.root.transform(population, peripheral, m))
            .collect();
        Ok(self.kind.aggregate(&weights))
    }

    /// The tree's contribution to the prediction: intercept plus the
    /// aggregated output (0 when the row has no matches).
    fn predict_row(
        &self,
        population: &DataFrame,
        peripheral: &DataFrame,
        row: usize,
        use_timestamps: bool,
    ) -> Result<f64> {
        let agg = self.feature_value(population, peripheral, row, use_timestamps)?;
        Ok(self.intercept + if agg.is_nan() { 0.0 } else { agg })
    }
}

/// An additive sequence of relational trees plus the global intercept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ensemble {
    trees: Vec<DecisionTree>,
    /// The initial prediction (target mean).
    intercept: f64,
}

impl Ensemble {
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Fits `hyp.num_features` trees, binding tree `k` round-robin to
    /// `combos[k % combos.len()]` = (peripheral index, aggregation).
    pub fn fit(
        population: &DataFrame,
        peripherals: &[DataFrame],
        combos: &[(usize, AggregationKind)],
        hyp: &Hyperparameters,
    ) -> Result<Ensemble> {
        if population.nrows() == 0 {
            return Err(Error::EmptyTable(population.name().to_string()));
        }
        if combos.is_empty() {
            return Err(Error::FlatDataModel);
        }

        let y = population.primary_target()?.data();
        let nrows = y.len();
        let intercept = y.iter().sum::<f64>() / nrows as f64;
        let mut yhat = vec![intercept; nrows];

        let mut ensemble = Ensemble {
            trees: Vec::new(),
            intercept,
        };

        let mut best_score = f64::INFINITY;
        let mut rounds_without_improvement = 0;

        for k in 0..hyp.num_features {
            let (peripheral_ix, kind) = combos[k % combos.len()];
            let peripheral = &peripherals[peripheral_ix];

            let mut matches =
                MatchMaker::make_matches(population, peripheral, hyp.use_timestamps)?;
            let residuals: Vec<f64> = y.iter().zip(&yhat).map(|(t, p)| t - p).collect();
            let mut loss = Aggregation::new(
                kind,
                SquareLoss::new(residuals, hyp.reg_lambda),
                &matches,
                nrows,
            );

            let mut root = DecisionTreeNode::root();
            let num_matches = matches.len();
            let mut ctx = FitCtx {
                output: population,
                input: peripheral,
                hyp,
                loss: &mut loss,
                intercept: 0.0,
            };
            root.fit(&mut ctx, &mut matches, 0, num_matches)?;
            let tree_intercept = ctx.intercept;

            let tree = DecisionTree {
                root,
                kind,
                peripheral_ix,
                intercept: tree_intercept,
                update_rate: 0.0,
            };

            let predictions = (0..nrows)
                .into_par_iter()
                .map(|row| tree.predict_row(population, peripheral, row, hyp.use_timestamps))
                .collect::<Result<Vec<f64>>>()?;

            let update_rate = hyp.shrinkage * loss.calc_update_rate(&predictions);
            let reduction = loss.evaluate_tree(update_rate, &predictions);

            debug!(
                tree = k,
                aggregation = %kind,
                peripheral = peripheral.name(),
                update_rate,
                reduction,
                nodes = tree.root.num_nodes(),
                "fitted tree"
            );

            if reduction < hyp.min_loss_reduction {
                info!(tree = k, reduction, "loss reduction below floor, stopping");
                break;
            }

            for (p, pred) in yhat.iter_mut().zip(&predictions) {
                *p += update_rate * pred;
            }
            ensemble.trees.push(DecisionTree {
                update_rate,
                ..tree
            });

            let score: f64 = y
                .iter()
                .zip(&yhat)
                .map(|(t, p)| (t - p) * (t - p))
                .sum();
            if score < best_score {
                best_score = score;
                rounds_without_improvement = 0;
            } else {
                rounds_without_improvement += 1;
                if hyp.early_stopping_rounds > 0
                    && rounds_without_improvement >= hyp.early_stopping_rounds
                {
                    info!(tree = k, score, "no improvement, stopping early");
                    break;
                }
            }
        }

        info!(num_trees = ensemble.trees.len(), intercept, "ensemble fitted");
        Ok(ensemble)
    }

    /// Predictions: intercept plus the shrunken sum over trees.
    pub fn predict(
        &self,
        population: &DataFrame,
        peripherals: &[DataFrame],
        use_timestamps: bool,
    ) -> Result<Vec<f64>> {
        (0..population.nrows())
            .into_par_iter()
            .map(|row| {
                let mut p = self.intercept;
                for tree in &self.trees {
                    let contribution = tree.predict_row(
                        population,
                        &peripherals[tree.peripheral_ix],
                        row,
                        use_timestamps,
                    )?;
                    p += tree.update_rate * contribution;
                }
                Ok(p)
            })
            .collect()
    }

    /// One feature column per tree: the raw aggregated outputs.
    pub fn feature_column(
        &self,
        tree_ix: usize,
        population: &DataFrame,
        peripherals: &[DataFrame],
        use_timestamps: bool,
    ) -> Result<Vec<f64>> {
        let tree = &self.trees[tree_ix];
        let peripheral = &peripherals[tree.peripheral_ix];
        (0..population.nrows())
            .into_par_iter()
            .map(|row| tree.feature_value(population, peripheral, row, use_timestamps))
            .collect()
    }
}
