//! # relfeat - Relational Feature Engineering Engine
//!
//! Given a population table (the rows to predict for) and a star- or
//! snowflake-shaped set of peripheral tables joined by foreign keys with
//! time-stamp constraints, this crate mechanically synthesizes a bank of
//! scalar features - each one an aggregation over a filtered subset of
//! related peripheral rows - and scores them for a downstream predictor.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Arrow record batches
//!     ↓
//! [ArrowHandler]             → role-typed DataFrames (+ string encodings)
//!     ↓
//! [MatchMaker]               → (population row, peripheral row) match buffer
//!     ↓
//! [Ensemble.fit]             → per tree:
//!     [DecisionTreeNode]         → enumerate candidate splits
//!         [Aggregation]              → per-row sufficient statistics (η)
//!             [SquareLoss]               → closed-form weights + reduction
//!     ↓
//! [FeatureLearner.transform] → Features (NaN/±∞ coerced to 0.0)
//! ```
//!
//! Two learners share the containers:
//!
//! - [`FeatureLearner`] *learns* filter conditions and aggregation weights
//!   end-to-end: gradient-boosted relational trees whose loss chain routes
//!   gradients through an AVG/SUM operator.
//! - [`DeepFeatureSynthesis`] enumerates (aggregation × column × condition)
//!   tuples mechanically from the schema, without learning.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relfeat::{FeatureLearner, Hyperparameters};
//!
//! let mut learner = FeatureLearner::new(Hyperparameters::default());
//! learner.fit(&population, &peripherals)?;
//! let features = learner.transform(&population, &peripherals)?;
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `containers` | Columns, DataFrames, match buffer, dirty-index |
//! | `loss` | Loss contract + terminal square loss |
//! | `aggregations` | AVG/SUM presenting the loss contract to the tree |
//! | `trees` | Split enumeration, tree nodes, boosting ensemble |
//! | `dfs` | Mechanical propositionalization |
//! | `feature_learner` | The fit/transform façade |
//! | `arrow_handler` | Arrow ingestion per role |
//! | `storage` | Parquet persistence |
//! | `text` | Tokenizer, vocabulary, token indices |
//! | `pool` | Memory-mapped backing store for spilled intermediates |
//! | `config` | Layered runtime configuration |

pub mod aggregations;
pub mod arrow_handler;
pub mod config;
pub mod containers;
pub mod dfs;
pub mod error;
pub mod feature_learner;
pub mod features;
pub mod hyperparameters;
pub mod loss;
pub mod pool;
pub mod schema;
pub mod storage;
pub mod text;
pub mod trees;

// Re-export the public surface
pub use aggregations::{Aggregation, AggregationKind};
pub use arrow_handler::ArrowHandler;
pub use config::{init_logging, Config, EngineConfig, LoggingConfig};
pub use containers::{Column, DataFrame, Encoding, IntSet, JoinKeyIndex, Match, MatchMaker};
pub use dfs::{AbstractFeature, Condition, DeepFeatureSynthesis, DfsAggregation, DfsDataUsed};
pub use error::{Error, Result};
pub use feature_learner::FeatureLearner;
pub use features::Features;
pub use hyperparameters::Hyperparameters;
pub use loss::{LossFunction, SquareLoss, Update, Weights};
pub use pool::{Pool, PoolRef};
pub use schema::Schema;
pub use storage::{load_from_parquet, save_to_parquet, CompressionCodec, StorageError};
pub use text::{tokenize, TokenIndex, Vocabulary};
pub use trees::{DataUsed, DecisionTree, DecisionTreeNode, Ensemble, Split};
