//! Record stream building blocks: in-memory streams, order checking and the
//! k-way shard merge.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use super::{KeyedRecord, RecordStream};
use crate::error::{BucketJoinError, Result};
use crate::metadata::SortKey;

/// Stream over an in-memory vector of records.
#[derive(Debug, Clone)]
pub struct VecStream {
    label: String,
    records: std::vec::IntoIter<KeyedRecord>,
}

impl VecStream {
    pub fn new(label: impl Into<String>, records: Vec<KeyedRecord>) -> Self {
        Self {
            label: label.into(),
            records: records.into_iter(),
        }
    }

    /// Records with primary keys only, built from `(key, value)` byte pairs.
    pub fn from_pairs<K, V>(label: impl Into<String>, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        let records = pairs
            .into_iter()
            .map(|(k, v)| KeyedRecord::new(SortKey::primary_only(k), v.into()))
            .collect();
        Self::new(label, records)
    }
}

impl RecordStream for VecStream {
    fn next_record(&mut self) -> Result<Option<KeyedRecord>> {
        Ok(self.records.next())
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

/// Wraps a stream and fails with `SortOrderViolation` if a key is smaller than
/// its predecessor.
pub struct CheckedStream<S> {
    inner: S,
    label: String,
    last: Option<SortKey>,
}

impl<S: RecordStream> CheckedStream<S> {
    pub fn new(inner: S, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
            last: None,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: RecordStream> RecordStream for CheckedStream<S> {
    fn next_record(&mut self) -> Result<Option<KeyedRecord>> {
        let Some(record) = self.inner.next_record()? else {
            return Ok(None);
        };
        if let Some(last) = &self.last {
            if record.key < *last {
                return Err(BucketJoinError::SortOrderViolation {
                    source: self.label.clone(),
                    previous: last.to_bytes(),
                    current: record.key.to_bytes(),
                });
            }
        }
        self.last = Some(record.key.clone());
        Ok(Some(record))
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

/// Heap entry; ties on key are broken by input index so duplicates come out in
/// input order.
struct HeadEntry {
    key: SortKey,
    input: usize,
    value: Vec<u8>,
}

impl PartialEq for HeadEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeadEntry {}

impl Ord for HeadEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.input.cmp(&other.input))
    }
}

impl PartialOrd for HeadEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// K-way merge of sorted streams into one sorted stream.
///
/// Used to merge the shard files of one bucket (and, when a source has more buckets
/// than the join targets, the files of several buckets). O(n log k).
pub struct ShardMerge {
    label: String,
    inputs: Vec<Box<dyn RecordStream>>,
    heap: BinaryHeap<Reverse<HeadEntry>>,
    primed: bool,
}

impl ShardMerge {
    pub fn new(label: impl Into<String>, inputs: Vec<Box<dyn RecordStream>>) -> Self {
        let heap = BinaryHeap::with_capacity(inputs.len());
        Self {
            label: label.into(),
            inputs,
            heap,
            primed: false,
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    fn pull(&mut self, input: usize) -> Result<()> {
        if let Some(record) = self.inputs[input].next_record()? {
            self.heap.push(Reverse(HeadEntry {
                key: record.key,
                input,
                value: record.value,
            }));
        }
        Ok(())
    }
}

impl RecordStream for ShardMerge {
    fn next_record(&mut self) -> Result<Option<KeyedRecord>> {
        if !self.primed {
            self.primed = true;
            for input in 0..self.inputs.len() {
                self.pull(input)?;
            }
        }

        let Some(Reverse(head)) = self.heap.pop() else {
            return Ok(None);
        };
        // Refill from the input the minimum came from.
        self.pull(head.input)?;
        Ok(Some(KeyedRecord::new(head.key, head.value)))
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}
