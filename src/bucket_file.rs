//! Bucket file Parquet I/O.
//!
//! Each `(bucket, shard)` of a dataset is one Parquet file with schema
//! `(key: binary, secondary_key: binary?, value: binary)`, sorted by
//! `(key, secondary_key)`.

use arrow::array::{Array, ArrayRef, BinaryArray, BinaryBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ArrowWriter;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::constants::{columns, DEFAULT_READ_BATCH_SIZE, DEFAULT_ROW_GROUP_SIZE};
use crate::error::{BucketJoinError, Result};
use crate::merge::{KeyedRecord, RecordStream};
use crate::metadata::SortKey;

/// Compression codec for bucket files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BucketFileCompression {
    /// Snappy compression (fast, moderate ratio). Default.
    #[default]
    Snappy,
    /// Zstd compression (slower, better ratio).
    Zstd,
    /// No compression.
    Uncompressed,
}

impl std::str::FromStr for BucketFileCompression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "snappy" => Ok(BucketFileCompression::Snappy),
            "zstd" => Ok(BucketFileCompression::Zstd),
            "none" | "uncompressed" => Ok(BucketFileCompression::Uncompressed),
            other => Err(format!("unknown compression '{}'", other)),
        }
    }
}

/// Configuration options for writing bucket files.
#[derive(Debug, Clone)]
pub struct BucketFileOptions {
    /// Maximum rows per row group. Default: 65,536.
    pub row_group_size: usize,

    /// Compression codec. Default: Snappy.
    pub compression: BucketFileCompression,
}

impl Default for BucketFileOptions {
    fn default() -> Self {
        Self {
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            compression: BucketFileCompression::Snappy,
        }
    }
}

impl BucketFileOptions {
    /// Validate options. Returns error if any values are out of bounds.
    pub fn validate(&self) -> Result<()> {
        if self.row_group_size == 0 {
            return Err(BucketJoinError::config(
                "row_group_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Convert options to parquet WriterProperties.
    pub fn to_writer_properties(&self) -> parquet::file::properties::WriterProperties {
        use parquet::basic::Compression;
        use parquet::file::properties::{EnabledStatistics, WriterProperties, WriterVersion};
        use parquet::schema::types::ColumnPath;

        let compression = match self.compression {
            BucketFileCompression::Snappy => Compression::SNAPPY,
            BucketFileCompression::Zstd => {
                Compression::ZSTD(parquet::basic::ZstdLevel::default())
            }
            BucketFileCompression::Uncompressed => Compression::UNCOMPRESSED,
        };

        // Payloads are opaque and rarely repeat; keys benefit from dictionaries when
        // a key has many duplicate records.
        let value_col = ColumnPath::new(vec![columns::VALUE.to_string()]);

        WriterProperties::builder()
            .set_writer_version(WriterVersion::PARQUET_2_0)
            .set_compression(compression)
            .set_statistics_enabled(EnabledStatistics::Chunk)
            .set_max_row_group_size(self.row_group_size.max(1))
            .set_column_dictionary_enabled(value_col, false)
            .build()
    }
}

/// Arrow schema shared by every bucket file.
pub fn bucket_file_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(columns::KEY, DataType::Binary, false),
        Field::new(columns::SECONDARY_KEY, DataType::Binary, true),
        Field::new(columns::VALUE, DataType::Binary, false),
    ]))
}

/// Write pre-sorted records to one bucket file. Returns the number of rows.
///
/// The caller guarantees `records` is sorted by key; the writer does not re-check.
/// An empty slice still produces a valid file with the bucket schema. The file is
/// fsynced before returning.
pub fn write_bucket_file(
    path: &Path,
    records: &[KeyedRecord],
    options: &BucketFileOptions,
) -> Result<u64> {
    let schema = bucket_file_schema();
    let file = File::create(path)
        .map_err(|e| BucketJoinError::io(path.to_path_buf(), "create bucket file", e))?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(options.to_writer_properties()))?;

    for chunk in records.chunks(options.row_group_size.max(1)) {
        let key_bytes: usize = chunk.iter().map(|r| r.key.primary.len()).sum();
        let value_bytes: usize = chunk.iter().map(|r| r.value.len()).sum();

        let mut keys = BinaryBuilder::with_capacity(chunk.len(), key_bytes);
        let mut secondary = BinaryBuilder::with_capacity(chunk.len(), 0);
        let mut values = BinaryBuilder::with_capacity(chunk.len(), value_bytes);
        for record in chunk {
            keys.append_value(&record.key.primary);
            match &record.key.secondary {
                Some(s) => secondary.append_value(s),
                None => secondary.append_null(),
            }
            values.append_value(&record.value);
        }

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(keys.finish()) as ArrayRef,
                Arc::new(secondary.finish()) as ArrayRef,
                Arc::new(values.finish()) as ArrayRef,
            ],
        )?;
        writer.write(&batch)?;
    }
    let file = writer.into_inner()?;
    file.sync_all()
        .map_err(|e| BucketJoinError::io(path.to_path_buf(), "sync bucket file", e))?;

    Ok(records.len() as u64)
}

/// Streaming reader over one bucket file.
///
/// Owns the file handle; dropping the reader closes it.
pub struct BucketFileReader {
    path: PathBuf,
    reader: ParquetRecordBatchReader,
    batch: Option<RecordBatch>,
    row: usize,
}

impl BucketFileReader {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_batch_size(path, DEFAULT_READ_BATCH_SIZE)
    }

    /// Open a bucket file. A missing or unreadable file is a `MissingBucketFile`.
    pub fn open_with_batch_size(path: &Path, batch_size: usize) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| BucketJoinError::missing_file(path.to_path_buf(), e.to_string()))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
            BucketJoinError::missing_file(path.to_path_buf(), format!("corrupt bucket file: {}", e))
        })?;

        let expected = bucket_file_schema();
        let actual = builder.schema();
        if actual.fields().len() != expected.fields().len()
            || actual
                .fields()
                .iter()
                .zip(expected.fields().iter())
                .any(|(a, e)| a.name() != e.name() || a.data_type() != e.data_type())
        {
            return Err(BucketJoinError::missing_file(
                path.to_path_buf(),
                format!("unexpected bucket file schema: {:?}", actual),
            ));
        }

        let reader = builder.with_batch_size(batch_size.max(1)).build().map_err(|e| {
            BucketJoinError::missing_file(path.to_path_buf(), format!("corrupt bucket file: {}", e))
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            batch: None,
            row: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn column<'a>(&self, batch: &'a RecordBatch, idx: usize) -> Result<&'a BinaryArray> {
        batch
            .column(idx)
            .as_any()
            .downcast_ref::<BinaryArray>()
            .ok_or_else(|| {
                BucketJoinError::missing_file(
                    self.path.clone(),
                    format!("expected BinaryArray for column {}", idx),
                )
            })
    }
}

impl RecordStream for BucketFileReader {
    fn next_record(&mut self) -> Result<Option<KeyedRecord>> {
        loop {
            if let Some(batch) = &self.batch {
                if self.row < batch.num_rows() {
                    let keys = self.column(batch, 0)?;
                    let secondary = self.column(batch, 1)?;
                    let values = self.column(batch, 2)?;
                    let i = self.row;
                    self.row += 1;

                    let key = SortKey::new(
                        keys.value(i).to_vec(),
                        if secondary.is_null(i) {
                            None
                        } else {
                            Some(secondary.value(i).to_vec())
                        },
                    );
                    return Ok(Some(KeyedRecord::new(key, values.value(i).to_vec())));
                }
            }

            match self.reader.next() {
                Some(Ok(batch)) => {
                    self.batch = Some(batch);
                    self.row = 0;
                }
                Some(Err(e)) => {
                    return Err(BucketJoinError::missing_file(
                        self.path.clone(),
                        format!("corrupt bucket file: {}", e),
                    ))
                }
                None => {
                    self.batch = None;
                    return Ok(None);
                }
            }
        }
    }

    fn label(&self) -> String {
        self.path.display().to_string()
    }
}

/// Number of rows in a bucket file, read from the footer.
pub fn bucket_file_row_count(path: &Path) -> Result<u64> {
    let file = File::open(path)
        .map_err(|e| BucketJoinError::missing_file(path.to_path_buf(), e.to_string()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    Ok(builder.metadata().file_metadata().num_rows().max(0) as u64)
}
