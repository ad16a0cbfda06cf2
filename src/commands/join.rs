//! `bucketjoin join`: merge datasets bucket by bucket.

use anyhow::{Context, Result};
use std::io::Write;

use bucketjoin::{
    CoGroup, KeyGrouping, MetadataCache, ReadOptions, SortedBucketReader, Utf8RecordCoder,
};

use super::args::{JoinArgs, JoinMode};
use super::helpers::{open_output, open_sources};

/// Render one co-group as output lines.
fn format_group(group: &CoGroup, mode: JoinMode, out: &mut Vec<String>) -> bucketjoin::Result<()> {
    let mut key = String::from_utf8_lossy(&group.key).into_owned();
    if let Some(secondary) = &group.secondary {
        key.push('\t');
        key.push_str(&String::from_utf8_lossy(secondary));
    }

    let records: Vec<Vec<String>> = (0..group.num_sources())
        .map(|i| group.decode::<String, _>(i, &Utf8RecordCoder))
        .collect::<bucketjoin::Result<_>>()?;

    match mode {
        JoinMode::Cogroup => {
            for (i, source_records) in records.iter().enumerate() {
                for record in source_records {
                    out.push(format!("{}\t{}\t{}", key, i, record));
                }
            }
        }
        JoinMode::Inner => {
            if !group.is_inner() {
                return Ok(());
            }
            // Cartesian product across sources.
            let mut rows: Vec<String> = vec![key];
            for source_records in &records {
                rows = rows
                    .iter()
                    .flat_map(|prefix| {
                        source_records
                            .iter()
                            .map(move |record| format!("{}\t{}", prefix, record))
                    })
                    .collect();
            }
            out.extend(rows);
        }
    }
    Ok(())
}

pub fn run_join(args: &JoinArgs) -> Result<()> {
    let cache = MetadataCache::new();
    let sources = open_sources(&args.dirs, &cache)?;
    let options = ReadOptions {
        grouping: if args.by_secondary {
            KeyGrouping::PrimaryAndSecondary
        } else {
            KeyGrouping::Primary
        },
        parallelism: args.parallelism,
        ..Default::default()
    };
    let reader = SortedBucketReader::new(sources, options).context("Datasets cannot be joined")?;
    log::info!(
        "Joining {} datasets over {} target buckets",
        args.dirs.len(),
        reader.num_target_buckets()
    );

    let mode = args.mode;
    let buckets = reader.process_buckets(|_, groups| {
        let mut lines = Vec::new();
        for group in &groups {
            format_group(group, mode, &mut lines)?;
        }
        Ok((groups.len(), lines))
    })?;

    let mut out = open_output(args.output.as_ref())?;
    let mut total_groups = 0;
    let mut total_lines = 0;
    for (groups, lines) in buckets {
        total_groups += groups;
        total_lines += lines.len();
        for line in lines {
            writeln!(out, "{}", line)?;
        }
    }
    out.flush()?;

    log::info!("Wrote {} lines from {} co-groups", total_lines, total_groups);
    Ok(())
}
