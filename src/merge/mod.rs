//! Sorted record streams and the N-way merge join.
//!
//! # Architecture
//!
//! ```text
//! source 0: shard file ─┐
//!           shard file ─┼─ ShardMerge ─ CheckedStream ─┐
//!           shard file ─┘                              │
//!                                                      ├─ MergeJoin ─> CoGroup*
//! source 1: shard file ─── ShardMerge ─ CheckedStream ─┘
//! ```
//!
//! Every stream yields [`KeyedRecord`]s in non-decreasing [`SortKey`] order. The
//! merge never buffers more than one record per input.

mod join;
mod stream;

pub use join::{CancellationToken, CoGroup, MergeJoin, RehashFilter};
pub use stream::{CheckedStream, ShardMerge, VecStream};

use crate::error::Result;
use crate::metadata::SortKey;

/// One record of a bucket file: its sort key and encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedRecord {
    pub key: SortKey,
    pub value: Vec<u8>,
}

impl KeyedRecord {
    pub fn new(key: SortKey, value: Vec<u8>) -> Self {
        Self { key, value }
    }
}

/// A pull-based stream of records sorted by key.
///
/// Implementations are consumed on one thread at a time but may be moved between
/// rayon workers.
pub trait RecordStream: Send {
    /// Next record, `Ok(None)` once exhausted.
    fn next_record(&mut self) -> Result<Option<KeyedRecord>>;

    /// Name used in diagnostics.
    fn label(&self) -> String {
        "record stream".to_string()
    }
}

impl<S: RecordStream + ?Sized> RecordStream for Box<S> {
    fn next_record(&mut self) -> Result<Option<KeyedRecord>> {
        (**self).next_record()
    }

    fn label(&self) -> String {
        (**self).label()
    }
}
