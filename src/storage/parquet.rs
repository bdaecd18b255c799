//! Parquet persistence for role-typed tables.
//!
//! Reads go through the Arrow bridge; writes take a selectable compression
//! codec. File names are augmented with `.parquet` when the extension is
//! absent.

use crate::arrow_handler::ArrowHandler;
use crate::containers::DataFrame;
use crate::schema::Schema;
use crate::storage::error::{StorageError, StorageResult};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{BrotliLevel, Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Compression codec for Parquet writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionCodec {
    Brotli,
    Gzip,
    Lz4,
    Snappy,
    Zstd,
}

impl CompressionCodec {
    fn to_parquet(self) -> Compression {
        match self {
            CompressionCodec::Brotli => Compression::BROTLI(BrotliLevel::default()),
            CompressionCodec::Gzip => Compression::GZIP(GzipLevel::default()),
            CompressionCodec::Lz4 => Compression::LZ4,
            CompressionCodec::Snappy => Compression::SNAPPY,
            CompressionCodec::Zstd => Compression::ZSTD(ZstdLevel::default()),
        }
    }
}

/// Appends `.parquet` when the path carries no extension.
pub fn with_parquet_extension(path: &Path) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension("parquet")
    }
}

/// Writes a DataFrame as one Parquet file.
pub fn save_to_parquet(
    handler: &ArrowHandler,
    df: &DataFrame,
    path: &Path,
    codec: CompressionCodec,
) -> StorageResult<()> {
    let path = with_parquet_extension(path);
    let batch = handler
        .to_record_batch(df)
        .map_err(|e| StorageError::Other(e.to_string()))?;

    let file = File::create(&path)?;
    let props = WriterProperties::builder()
        .set_compression(codec.to_parquet())
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Reads a Parquet file back into the role layout given by `schema`.
pub fn load_from_parquet(
    handler: &mut ArrowHandler,
    schema: &Schema,
    path: &Path,
) -> StorageResult<DataFrame> {
    let path = with_parquet_extension(path);
    let file = File::open(&path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    handler
        .to_dataframe(schema, &batches)
        .map_err(|e| StorageError::Other(e.to_string()))
}
