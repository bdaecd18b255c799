//! Engine Error Types
//!
//! Errors are surfaced, not recovered, at the boundaries of `fit` and
//! `transform`. A per-cell NaN is data, not an error.

use thiserror::Error;

/// Engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Schema mismatch between fit-time schema and the data handed to
    /// transform (column counts, names or roles disagree)
    #[error("Schema error: {0}")]
    Schema(String),

    /// A named non-target column is missing from the data
    #[error("Column '{name}' is missing")]
    MissingColumn { name: String },

    /// The population table has zero rows
    #[error("Table '{0}' has zero rows")]
    EmptyTable(String),

    /// Ingestion saw an Arrow type that has no mapping
    #[error("Unsupported Arrow type '{type_name}' for field '{field}'")]
    UnsupportedArrowType { field: String, type_name: String },

    /// A transform-style operation was called before a successful fit
    #[error("The learner has not been fitted. Call fit() first.")]
    NotFitted,

    /// The data model contains no peripheral tables. A relational learner
    /// cannot extract features from a flat table.
    #[error(
        "The data model contains no peripheral tables, so there is nothing \
         to aggregate over. Use a propositional learning algorithm instead."
    )]
    FlatDataModel,

    /// An internal invariant failed. These should be impossible.
    #[error("Internal error: {0}")]
    Internal(String),

    /// One or more parallel workers failed during transform
    #[error("{} worker shard(s) failed; first failure: {}", .0.len(), .0.first().map_or("<none>", |s| s.as_str()))]
    WorkerErrors(Vec<String>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
