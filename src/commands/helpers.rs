//! Helper functions shared by the bucketjoin CLI commands.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bucketjoin::{BucketedSource, KeyStrategy, MetadataCache, StringCoder};

/// Key strategy for delimited text lines.
///
/// A key is the column at `column`; a missing or empty column means the line has
/// no key.
pub fn line_key_strategy(
    column: usize,
    secondary_column: Option<usize>,
    delimiter: char,
) -> Result<KeyStrategy<String>> {
    let keys = KeyStrategy::new(format!("column:{}", column), StringCoder, move |line: &String| {
        column_value(line, delimiter, column)
    })?;
    match secondary_column {
        Some(secondary) => Ok(keys.with_secondary(
            format!("column:{}", secondary),
            StringCoder,
            move |line: &String| column_value(line, delimiter, secondary),
        )?),
        None => Ok(keys),
    }
}

fn column_value(line: &str, delimiter: char, column: usize) -> Option<String> {
    line.split(delimiter)
        .nth(column)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Read every line of a text file, without line terminators.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file =
        File::open(path).context(format!("Failed to open input file: {}", path.display()))?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.context(format!("Failed to read {}", path.display()))?;
        lines.push(line.trim_end_matches('\r').to_string());
    }
    Ok(lines)
}

/// Buffered writer to a file, or stdout when `path` is `None` or `-`.
pub fn open_output(path: Option<&PathBuf>) -> Result<Box<dyn Write>> {
    match path {
        Some(p) if p.as_os_str() != "-" => {
            let file = File::create(p)
                .context(format!("Failed to create output file: {}", p.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        _ => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}

/// Open every dataset directory through one metadata cache.
pub fn open_sources(dirs: &[PathBuf], cache: &MetadataCache) -> Result<Vec<BucketedSource>> {
    dirs.iter()
        .map(|dir| {
            BucketedSource::open_cached(dir, cache)
                .context(format!("Failed to open dataset: {}", dir.display()))
        })
        .collect()
}
