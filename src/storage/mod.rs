//! Storage formats (Parquet persistence, storage errors).
//!
//! Parquet is the only on-disk table format: columnar, compressed, and read
//! back through the same Arrow bridge ingestion uses. The persistence format
//! is not frozen.

pub mod error;
pub mod parquet;

pub use error::{StorageError, StorageResult};
pub use parquet::{load_from_parquet, save_to_parquet, with_parquet_extension, CompressionCodec};
