//! Command-line argument definitions for the bucketjoin CLI.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use bucketjoin::{HashType, TargetParallelism};

#[derive(Parser)]
#[command(name = "bucketjoin")]
#[command(about = "Sort-merge-bucket storage and shuffle-free joins over bucketed Parquet files")]
#[command(
    long_about = "bucketjoin: write line-oriented text datasets as hash-bucketed, key-sorted Parquet files and join them bucket by bucket without a shuffle.

WORKFLOW:
  1. Bucket each dataset:  bucketjoin bucket -i users.tsv -o users --key-column 0
  2. Check compatibility:  bucketjoin check -d users -d orders
  3. Join:                 bucketjoin join -d users -d orders -o joined.tsv

DATASET LAYOUT:
  <dir>/metadata.toml                                   partitioning scheme
  <dir>/bucket-BBBBB-of-NNNNN-shard-SSSSS-of-MMMMM.parquet

  Datasets can be joined when they use the same hash function and key type and
  their bucket counts differ by a power of two."
)]
#[command(after_help = "EXAMPLES:
  # Bucket a TSV file on its first column into 16 buckets
  bucketjoin bucket -i users.tsv -o users --key-column 0 --num-buckets 16

  # Bucket a CSV file with a secondary sort column, recording key-less lines
  bucketjoin bucket -i events.csv -o events --delimiter , --key-column 1 \\
      --secondary-column 0 --rejects events.rejects

  # Inner join two datasets, iterating the smaller bucket count
  bucketjoin join -d users -d orders --mode inner --parallelism min")]
pub struct Cli {
    /// Enable verbose progress output with timestamps
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a text file as a bucketed dataset
    #[command(after_help = "CONFIG FORMAT (--config):
  [bucket]
  num_buckets = 16                 # Power of two
  num_shards = 1                   # Files per bucket
  hash_type = \"murmur3_32\"         # murmur3_32 or crc32
  filename_prefix = \"bucket\"
  max_key_failures = 100           # Optional: abort past this many key-less lines

  [key]
  column = 0                       # 0-based key column
  secondary_column = 1             # Optional secondary sort column
  delimiter = \"\\t\"

  [parquet]
  row_group_size = 65536
  compression = \"snappy\"           # snappy, zstd or none

Command-line options override config values.")]
    Bucket(BucketArgs),

    /// Show a dataset's metadata and per-file row counts
    Inspect {
        /// Dataset directory
        #[arg(short, long)]
        dir: PathBuf,
    },

    /// Check that datasets can be joined and print the join plan
    Check {
        /// Dataset directories, in join order
        #[arg(short, long = "dir", required = true)]
        dirs: Vec<PathBuf>,

        /// Group by primary and secondary key
        #[arg(long)]
        by_secondary: bool,

        /// Target bucket count: min, max or a power of two
        #[arg(long, default_value = "max", value_parser = parse_parallelism)]
        parallelism: TargetParallelism,
    },

    /// Join datasets bucket by bucket
    Join(JoinArgs),
}

#[derive(clap::Args)]
pub struct BucketArgs {
    /// Input text file, one record per line
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output dataset directory (created if missing)
    #[arg(short, long)]
    pub output: PathBuf,

    /// TOML job config
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 0-based column holding the key
    #[arg(long)]
    pub key_column: Option<usize>,

    /// 0-based column holding the secondary sort key
    #[arg(long)]
    pub secondary_column: Option<usize>,

    /// Column delimiter (single character, default tab)
    #[arg(long)]
    pub delimiter: Option<String>,

    /// Number of buckets (power of two)
    #[arg(long)]
    pub num_buckets: Option<u32>,

    /// Number of shard files per bucket
    #[arg(long)]
    pub num_shards: Option<u32>,

    /// Bucket hash function: murmur3-32 or crc32
    #[arg(long, value_parser = parse_hash_type)]
    pub hash: Option<HashType>,

    /// Bucket file name prefix
    #[arg(long)]
    pub prefix: Option<String>,

    /// Abort once more than this many lines have no key
    #[arg(long)]
    pub max_key_failures: Option<usize>,

    /// Write lines without a key to this file
    #[arg(long)]
    pub rejects: Option<PathBuf>,

    /// Parquet compression: snappy, zstd or none
    #[arg(long)]
    pub compression: Option<String>,
}

#[derive(clap::Args)]
pub struct JoinArgs {
    /// Dataset directories, in join order
    #[arg(short, long = "dir", required = true)]
    pub dirs: Vec<PathBuf>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output mode
    #[arg(long, value_enum, default_value_t = JoinMode::Cogroup)]
    pub mode: JoinMode,

    /// Target bucket count: min, max or a power of two
    #[arg(long, default_value = "max", value_parser = parse_parallelism)]
    pub parallelism: TargetParallelism,

    /// Group by primary and secondary key
    #[arg(long)]
    pub by_secondary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JoinMode {
    /// One line per record: key, source index, record
    Cogroup,
    /// One line per combination of records sharing a key across every source
    Inner,
}

fn parse_hash_type(s: &str) -> Result<HashType, String> {
    s.parse()
}

fn parse_parallelism(s: &str) -> Result<TargetParallelism, String> {
    s.parse()
}
