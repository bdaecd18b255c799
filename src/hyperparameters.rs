//! Learner hyperparameters.

use crate::aggregations::AggregationKind;
use serde::{Deserialize, Serialize};

/// Hyperparameters of the relational tree learner and of DFS. All fields
/// have serde defaults so partial JSON/TOML documents deserialize cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Number of features (trees) to fit.
    #[serde(default = "default_num_features")]
    pub num_features: usize,

    /// Maximum tree depth. 0 means a single leaf.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Minimum number of matches each side of a split must carry.
    #[serde(default = "default_min_num_samples")]
    pub min_num_samples: f64,

    /// Minimum loss reduction required to take a split.
    #[serde(default)]
    pub gamma: f64,

    /// L2 regularization on the leaf-weight updates.
    #[serde(default)]
    pub reg_lambda: f64,

    /// Multiplier on the line-searched per-tree update rate.
    #[serde(default = "default_shrinkage")]
    pub shrinkage: f64,

    /// Absolute floor on a tree's loss reduction; boosting stops below it.
    #[serde(default)]
    pub min_loss_reduction: f64,

    /// Stop after this many trees without score improvement. 0 disables.
    #[serde(default)]
    pub early_stopping_rounds: usize,

    /// Aggregation operators cycled over the fitted trees.
    #[serde(default = "default_aggregations")]
    pub aggregations: Vec<AggregationKind>,

    /// Whether matches are filtered by the time-stamp range.
    #[serde(default = "default_true")]
    pub use_timestamps: bool,

    /// Upper bound on the candidate thresholds per numeric column and node.
    #[serde(default = "default_max_critical_values")]
    pub max_critical_values: usize,

    /// Maximum text vocabulary size per text column.
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,

    /// Minimum document frequency for a token to enter the vocabulary.
    #[serde(default = "default_min_df")]
    pub min_df: usize,

    /// Worker shards for data-parallel transforms. 0 means half of the
    /// hardware concurrency.
    #[serde(default)]
    pub num_threads: usize,
}

fn default_num_features() -> usize {
    30
}
fn default_max_depth() -> usize {
    3
}
fn default_min_num_samples() -> f64 {
    1.0
}
fn default_shrinkage() -> f64 {
    0.1
}
fn default_aggregations() -> Vec<AggregationKind> {
    vec![AggregationKind::Avg, AggregationKind::Sum]
}
fn default_true() -> bool {
    true
}
fn default_max_critical_values() -> usize {
    100
}
fn default_vocab_size() -> usize {
    500
}
fn default_min_df() -> usize {
    30
}

impl Default for Hyperparameters {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap_or_else(|_| unreachable!("defaults are total"))
    }
}

impl Hyperparameters {
    /// The effective shard count: half the hardware concurrency unless
    /// overridden, never zero.
    pub fn effective_num_threads(&self) -> usize {
        if self.num_threads > 0 {
            self.num_threads
        } else {
            (num_cpus::get() / 2).max(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let hyp = Hyperparameters::default();
        assert_eq!(hyp.num_features, 30);
        assert_eq!(hyp.max_depth, 3);
        assert_eq!(hyp.aggregations, vec![AggregationKind::Avg, AggregationKind::Sum]);
        assert!(hyp.use_timestamps);
        assert!(hyp.effective_num_threads() >= 1);
    }

    #[test]
    fn test_partial_json() {
        let hyp: Hyperparameters =
            serde_json::from_str(r#"{"num_features": 5, "gamma": 0.5}"#).expect("parse");
        assert_eq!(hyp.num_features, 5);
        assert_eq!(hyp.gamma, 0.5);
        assert_eq!(hyp.max_depth, 3);
    }
}
