//! Unified error type for the bucketjoin library.
//!
//! Library code returns [`BucketJoinError`]; the CLI wraps it in `anyhow::Result`
//! for context chaining.
//!
//! # Error Categories
//!
//! - **Configuration**: `InvalidMetadata`, `UnsupportedOperation`, `Config`. Raised
//!   at construction time, never retried.
//! - **Compatibility**: `IncompatibleHash`, `IncompatibleKeyType`,
//!   `IncompatibleBucketCount`. Raised before any bucket file is opened.
//! - **Per-record**: `KeyExtraction`, raised only once the side-output threshold is
//!   exceeded.
//! - **Integrity**: `SortOrderViolation`, `MissingBucketFile`. Fatal for the bucket
//!   being merged.
//! - **Ambient**: `Io`, `Parquet`, `Codec`, `Cancelled`.

use std::fmt;
use std::path::PathBuf;

/// Unified error type for the bucketjoin library.
#[derive(Debug)]
pub enum BucketJoinError {
    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: std::io::Error,
    },

    /// Metadata failed validation (bucket count, version, coder determinism...).
    InvalidMetadata(String),

    /// Sources were bucketed with different hash functions.
    IncompatibleHash { expected: String, actual: String },

    /// Sources disagree on key type.
    IncompatibleKeyType { expected: String, actual: String },

    /// Bucket counts are not related by a power-of-two factor.
    IncompatibleBucketCount { num_buckets: u32, max_buckets: u32 },

    /// Too many records had no derivable key.
    KeyExtraction { failures: usize, threshold: usize },

    /// Operation not supported by this dataset (e.g. secondary key on a
    /// primary-only dataset).
    UnsupportedOperation(String),

    /// A sorted stream produced a key smaller than its predecessor.
    SortOrderViolation {
        source: String,
        previous: Vec<u8>,
        current: Vec<u8>,
    },

    /// An expected bucket file is missing or unreadable.
    MissingBucketFile { path: PathBuf, detail: String },

    /// Parquet or Arrow error.
    Parquet {
        context: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Record or document (de)serialization failure.
    Codec(String),

    /// Invalid job configuration.
    Config(String),

    /// The merge was cancelled between co-groups.
    Cancelled,
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl fmt::Display for BucketJoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketJoinError::Io {
                path,
                operation,
                source,
            } => {
                write!(
                    f,
                    "I/O error during {} on '{}': {}",
                    operation,
                    path.display(),
                    source
                )
            }
            BucketJoinError::InvalidMetadata(msg) => write!(f, "Invalid metadata: {}", msg),
            BucketJoinError::IncompatibleHash { expected, actual } => write!(
                f,
                "Incompatible hash type: expected {}, got {}",
                expected, actual
            ),
            BucketJoinError::IncompatibleKeyType { expected, actual } => write!(
                f,
                "Incompatible key type: expected {}, got {}",
                expected, actual
            ),
            BucketJoinError::IncompatibleBucketCount {
                num_buckets,
                max_buckets,
            } => write!(
                f,
                "Incompatible bucket count: {} is not a power-of-two divisor of {}",
                num_buckets, max_buckets
            ),
            BucketJoinError::KeyExtraction {
                failures,
                threshold,
            } => write!(
                f,
                "Key extraction failed for {} records (threshold {})",
                failures, threshold
            ),
            BucketJoinError::UnsupportedOperation(msg) => {
                write!(f, "Unsupported operation: {}", msg)
            }
            BucketJoinError::SortOrderViolation {
                source,
                previous,
                current,
            } => write!(
                f,
                "Sort order violation in {}: key {} follows {}",
                source,
                hex(current),
                hex(previous)
            ),
            BucketJoinError::MissingBucketFile { path, detail } => {
                write!(f, "Missing bucket file '{}': {}", path.display(), detail)
            }
            BucketJoinError::Parquet { context, source } => {
                if let Some(src) = source {
                    write!(f, "Parquet error ({}): {}", context, src)
                } else {
                    write!(f, "Parquet error: {}", context)
                }
            }
            BucketJoinError::Codec(msg) => write!(f, "Codec error: {}", msg),
            BucketJoinError::Config(msg) => write!(f, "Config error: {}", msg),
            BucketJoinError::Cancelled => write!(f, "Merge cancelled"),
        }
    }
}

impl std::error::Error for BucketJoinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BucketJoinError::Io { source, .. } => Some(source),
            BucketJoinError::Parquet {
                source: Some(s), ..
            } => Some(s.as_ref()),
            _ => None,
        }
    }
}

// ============================================================================
// Conversion traits
// ============================================================================

impl From<std::io::Error> for BucketJoinError {
    fn from(err: std::io::Error) -> Self {
        BucketJoinError::Io {
            path: PathBuf::new(),
            operation: "unknown",
            source: err,
        }
    }
}

impl From<parquet::errors::ParquetError> for BucketJoinError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        BucketJoinError::Parquet {
            context: "parquet operation".to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<arrow::error::ArrowError> for BucketJoinError {
    fn from(err: arrow::error::ArrowError) -> Self {
        BucketJoinError::Parquet {
            context: "arrow operation".to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<toml::de::Error> for BucketJoinError {
    fn from(err: toml::de::Error) -> Self {
        BucketJoinError::Codec(format!("invalid TOML document: {}", err))
    }
}

impl From<toml::ser::Error> for BucketJoinError {
    fn from(err: toml::ser::Error) -> Self {
        BucketJoinError::Codec(format!("failed to serialize TOML document: {}", err))
    }
}

/// Convenience type alias for Results using BucketJoinError.
pub type Result<T> = std::result::Result<T, BucketJoinError>;

// ============================================================================
// Helper constructors
// ============================================================================

impl BucketJoinError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, operation: &'static str, source: std::io::Error) -> Self {
        BucketJoinError::Io {
            path: path.into(),
            operation,
            source,
        }
    }

    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        BucketJoinError::InvalidMetadata(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        BucketJoinError::UnsupportedOperation(msg.into())
    }

    pub fn missing_file(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        BucketJoinError::MissingBucketFile {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Create a Parquet error without source.
    pub fn parquet(context: impl Into<String>) -> Self {
        BucketJoinError::Parquet {
            context: context.into(),
            source: None,
        }
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        BucketJoinError::Codec(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        BucketJoinError::Config(msg.into())
    }

    /// True for errors that must stop a job before any distributed work starts.
    pub fn is_pre_join(&self) -> bool {
        matches!(
            self,
            BucketJoinError::InvalidMetadata(_)
                | BucketJoinError::IncompatibleHash { .. }
                | BucketJoinError::IncompatibleKeyType { .. }
                | BucketJoinError::IncompatibleBucketCount { .. }
                | BucketJoinError::Config(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = BucketJoinError::io(
            "/data/users/metadata.toml",
            "read",
            std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/data/users/metadata.toml"));
        assert!(msg.contains("read"));
        assert!(msg.contains("file not found"));
    }

    #[test]
    fn test_sort_order_violation_display_is_hex() {
        let err = BucketJoinError::SortOrderViolation {
            source: "source 1".to_string(),
            previous: vec![0x02],
            current: vec![0x01, 0xff],
        };
        let msg = err.to_string();
        assert!(msg.contains("source 1"));
        assert!(msg.contains("01ff"));
        assert!(msg.contains("follows 02"));
    }

    #[test]
    fn test_bucket_count_display() {
        let err = BucketJoinError::IncompatibleBucketCount {
            num_buckets: 3,
            max_buckets: 16,
        };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains("16"));
    }

    #[test]
    fn test_error_source_chain() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err = BucketJoinError::io("/path", "open", io_err);
        assert!(std::error::Error::source(&err).is_some());
        assert!(std::error::Error::source(&BucketJoinError::Cancelled).is_none());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: BucketJoinError = io_err.into();

        match err {
            BucketJoinError::Io { operation, .. } => assert_eq!(operation, "unknown"),
            _ => panic!("Expected Io variant"),
        }
    }

    #[test]
    fn test_pre_join_classification() {
        assert!(BucketJoinError::invalid_metadata("x").is_pre_join());
        assert!(BucketJoinError::IncompatibleHash {
            expected: "murmur3_32".into(),
            actual: "crc32".into()
        }
        .is_pre_join());
        assert!(!BucketJoinError::missing_file("/x", "gone").is_pre_join());
        assert!(!BucketJoinError::Cancelled.is_pre_join());
    }
}
