//! `bucketjoin bucket`: write a text file as a bucketed dataset.

use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;

use bucketjoin::config::{parse_config, validate_config, JobConfig};
use bucketjoin::{BucketAssigner, BucketMetadata, SortedBucketWriter, Utf8RecordCoder};

use super::args::BucketArgs;
use super::helpers::{line_key_strategy, open_output, read_lines};

/// Merge the config file (if any) with command-line overrides.
fn resolve_config(args: &BucketArgs) -> Result<JobConfig> {
    let mut config = match &args.config {
        Some(path) => parse_config(path)?,
        None => JobConfig::default(),
    };

    if let Some(n) = args.num_buckets {
        config.bucket.num_buckets = n;
    }
    if let Some(n) = args.num_shards {
        config.bucket.num_shards = n;
    }
    if let Some(hash) = args.hash {
        config.bucket.hash_type = hash;
    }
    if let Some(prefix) = &args.prefix {
        config.bucket.filename_prefix = prefix.clone();
    }
    if args.max_key_failures.is_some() {
        config.bucket.max_key_failures = args.max_key_failures;
    }
    if let Some(column) = args.key_column {
        config.key.column = column;
    }
    if args.secondary_column.is_some() {
        config.key.secondary_column = args.secondary_column;
    }
    if let Some(delimiter) = &args.delimiter {
        config.key.delimiter = delimiter.clone();
    }
    if let Some(compression) = &args.compression {
        config.parquet.compression = compression.clone();
    }

    validate_config(&config)?;
    Ok(config)
}

pub fn run_bucket(args: &BucketArgs) -> Result<()> {
    let config = resolve_config(args)?;
    let keys = line_key_strategy(
        config.key.column,
        config.key.secondary_column,
        config.key.delimiter_char()?,
    )?;

    let metadata = BucketMetadata::try_new(
        config.bucket.num_buckets,
        config.bucket.num_shards,
        config.bucket.hash_type,
        config.bucket.filename_prefix.clone(),
        keys.primary_descriptor().clone(),
        keys.secondary_descriptor().cloned(),
    )?;
    let writer = SortedBucketWriter::new(
        BucketAssigner::new(metadata, keys)?,
        Arc::new(Utf8RecordCoder),
        config.write_options()?,
    )?;

    let lines = read_lines(&args.input)?;
    log::info!("Read {} lines from {}", lines.len(), args.input.display());

    let result = writer
        .write(&args.output, lines)
        .context(format!("Failed to write dataset {}", args.output.display()))?;

    if let Some(path) = &args.rejects {
        let mut out = open_output(Some(path))?;
        for line in &result.failed_records {
            writeln!(out, "{}", line)?;
        }
        out.flush()?;
    }

    println!(
        "Wrote {} records to {} ({} of {} files populated, {} lines without key)",
        result.records_written,
        args.output.display(),
        result.populated_files(),
        result.files.len(),
        result.failed_count()
    );
    Ok(())
}
