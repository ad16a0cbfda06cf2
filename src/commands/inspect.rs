//! `bucketjoin inspect` and `bucketjoin check`: metadata-level commands.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use bucketjoin::bucket_file::bucket_file_row_count;
use bucketjoin::{plan_join, BucketMetadata, KeyGrouping, MetadataCache, TargetParallelism};

use super::helpers::open_sources;

pub fn run_inspect(dir: &Path) -> Result<()> {
    let metadata = BucketMetadata::load(dir)
        .context(format!("Failed to load metadata from {}", dir.display()))?;

    println!("Dataset: {}", dir.display());
    print!("{}", metadata.to_toml_string()?);
    println!();
    println!("Files:");

    let mut total = 0u64;
    let mut missing = 0usize;
    for id in metadata.all_bucket_shards() {
        let path = metadata.bucket_file_path(dir, id);
        match bucket_file_row_count(&path) {
            Ok(rows) => {
                total += rows;
                println!("  {}\t{}", metadata.filename(id), rows);
            }
            Err(e) => {
                missing += 1;
                println!("  {}\tERROR: {}", metadata.filename(id), e);
            }
        }
    }
    println!("Total records: {}", total);
    if missing > 0 {
        anyhow::bail!("{} bucket files are missing or unreadable", missing);
    }
    Ok(())
}

pub fn run_check(
    dirs: &[PathBuf],
    by_secondary: bool,
    parallelism: TargetParallelism,
) -> Result<()> {
    let cache = MetadataCache::new();
    let sources = open_sources(dirs, &cache)?;
    let grouping = if by_secondary {
        KeyGrouping::PrimaryAndSecondary
    } else {
        KeyGrouping::Primary
    };

    let metadata: Vec<&BucketMetadata> = sources.iter().map(|s| s.metadata().as_ref()).collect();
    let plan = plan_join(&metadata, grouping, parallelism)?;

    println!("Compatible: yes");
    println!("Hash type: {}", plan.hash_type());
    println!("Target buckets: {}", plan.target_buckets());
    for (i, source) in sources.iter().enumerate() {
        let own = source.metadata().num_buckets();
        let role = if own < plan.target_buckets() {
            "replicated"
        } else if own > plan.target_buckets() {
            "merged"
        } else {
            "aligned"
        };
        println!(
            "  [{}] {}\t{} buckets x {} shards\t{}",
            i,
            source.label(),
            own,
            source.metadata().num_shards(),
            role
        );
    }
    Ok(())
}
