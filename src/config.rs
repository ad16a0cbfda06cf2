use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::bucket_file::{BucketFileCompression, BucketFileOptions};
use crate::constants::{DEFAULT_FILENAME_PREFIX, DEFAULT_ROW_GROUP_SIZE};
use crate::metadata::HashType;
use crate::writer::WriteOptions;

/// Job configuration for `bucketjoin bucket --config job.toml`.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    #[serde(default)]
    pub bucket: BucketSettings,
    #[serde(default)]
    pub key: KeySettings,
    #[serde(default)]
    pub parquet: ParquetSettings,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BucketSettings {
    #[serde(default = "default_num_buckets")]
    pub num_buckets: u32,
    #[serde(default = "default_num_shards")]
    pub num_shards: u32,
    #[serde(default)]
    pub hash_type: HashType,
    #[serde(default = "default_prefix")]
    pub filename_prefix: String,
    pub max_key_failures: Option<usize>,
}

fn default_num_buckets() -> u32 {
    16
}

fn default_num_shards() -> u32 {
    1
}

fn default_prefix() -> String {
    DEFAULT_FILENAME_PREFIX.to_string()
}

impl Default for BucketSettings {
    fn default() -> Self {
        Self {
            num_buckets: default_num_buckets(),
            num_shards: default_num_shards(),
            hash_type: HashType::default(),
            filename_prefix: default_prefix(),
            max_key_failures: None,
        }
    }
}

/// Which delimited columns of a text line are the keys (0-based).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeySettings {
    #[serde(default)]
    pub column: usize,
    pub secondary_column: Option<usize>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

fn default_delimiter() -> String {
    "\t".to_string()
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            column: 0,
            secondary_column: None,
            delimiter: default_delimiter(),
        }
    }
}

impl KeySettings {
    /// The delimiter as a single character.
    pub fn delimiter_char(&self) -> Result<char> {
        let mut chars = self.delimiter.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(anyhow!(
                "Config error: delimiter must be a single character (got {:?})",
                self.delimiter
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParquetSettings {
    #[serde(default = "default_row_group_size")]
    pub row_group_size: usize,
    #[serde(default = "default_compression")]
    pub compression: String,
}

fn default_row_group_size() -> usize {
    DEFAULT_ROW_GROUP_SIZE
}

fn default_compression() -> String {
    "snappy".to_string()
}

impl Default for ParquetSettings {
    fn default() -> Self {
        Self {
            row_group_size: default_row_group_size(),
            compression: default_compression(),
        }
    }
}

impl JobConfig {
    pub fn write_options(&self) -> Result<WriteOptions> {
        let compression: BucketFileCompression = self
            .parquet
            .compression
            .parse()
            .map_err(|e: String| anyhow!("Config error: {}", e))?;
        let options = WriteOptions {
            max_key_failures: self.bucket.max_key_failures,
            file: BucketFileOptions {
                row_group_size: self.parquet.row_group_size,
                compression,
            },
        };
        options.validate()?;
        Ok(options)
    }
}

pub fn parse_config(path: &Path) -> Result<JobConfig> {
    let contents = fs::read_to_string(path)
        .context(format!("Failed to read config file: {}", path.display()))?;

    let config: JobConfig = toml::from_str(&contents).context("Failed to parse TOML config")?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &JobConfig) -> Result<()> {
    let n = config.bucket.num_buckets;
    if n == 0 || !n.is_power_of_two() {
        return Err(anyhow!(
            "Config error: num_buckets must be a power of two (got {})",
            n
        ));
    }
    if config.bucket.num_shards == 0 {
        return Err(anyhow!("Config error: num_shards must be >= 1"));
    }
    if config.key.secondary_column == Some(config.key.column) {
        return Err(anyhow!(
            "Config error: secondary_column must differ from column ({})",
            config.key.column
        ));
    }
    config.key.delimiter_char()?;
    config.write_options()?;
    Ok(())
}
