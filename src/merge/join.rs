//! N-way sorted merge join producing co-groups.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{CheckedStream, KeyedRecord, RecordStream};
use crate::compat::KeyGrouping;
use crate::error::{BucketJoinError, Result};
use crate::metadata::{HashType, RecordCoder, SortKey};

/// Shared flag that stops in-flight merges between co-groups.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// All records sharing one key, one payload list per source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoGroup {
    /// Encoded primary key.
    pub key: Vec<u8>,
    /// Encoded secondary key; set only when grouping by primary and secondary key.
    pub secondary: Option<Vec<u8>>,
    /// `values[i]` holds the payloads of source `i`, empty if it lacks the key.
    pub values: Vec<Vec<Vec<u8>>>,
}

impl CoGroup {
    pub fn num_sources(&self) -> usize {
        self.values.len()
    }

    /// Payloads of one source, `None` if `source` is out of range.
    pub fn source(&self, source: usize) -> Option<&[Vec<u8>]> {
        self.values.get(source).map(Vec::as_slice)
    }

    /// True when every source has at least one record for the key.
    pub fn is_inner(&self) -> bool {
        self.values.iter().all(|v| !v.is_empty())
    }

    pub fn total_records(&self) -> usize {
        self.values.iter().map(Vec::len).sum()
    }

    /// Decode the payloads of one source.
    pub fn decode<R, C>(&self, source: usize, coder: &C) -> Result<Vec<R>>
    where
        C: RecordCoder<R> + ?Sized,
    {
        let values = self.values.get(source).ok_or_else(|| {
            BucketJoinError::unsupported(format!(
                "co-group has {} sources, no source {}",
                self.values.len(),
                source
            ))
        })?;
        values.iter().map(|bytes| coder.decode(bytes)).collect()
    }
}

/// Keeps only key groups that hash to one target bucket.
///
/// Needed when a source with fewer buckets than the join target is read for several
/// target buckets; without the filter its keys would be emitted once per replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RehashFilter {
    pub hash_type: HashType,
    pub target_buckets: u32,
    pub target: u32,
}

impl RehashFilter {
    pub fn keeps(&self, primary_key: &[u8]) -> bool {
        self.hash_type.bucket(primary_key, self.target_buckets) == self.target
    }
}

struct JoinInput {
    stream: CheckedStream<Box<dyn RecordStream>>,
    head: Option<KeyedRecord>,
}

/// Merges N sorted sources into co-groups in ascending key order.
///
/// Each source is order-checked as it is consumed, so a violation surfaces when the
/// out-of-order record is pulled. Co-groups completed before that point have already
/// been yielded; callers that need all-or-nothing output collect into
/// `Result<Vec<_>>`, as `SortedBucketReader::read_bucket` does. After the first error
/// the iterator is fused and yields `None`.
pub struct MergeJoin {
    inputs: Vec<JoinInput>,
    grouping: KeyGrouping,
    filter: Option<RehashFilter>,
    cancel: Option<CancellationToken>,
    primed: bool,
    finished: bool,
    emitted: u64,
    filtered: u64,
}

impl MergeJoin {
    pub fn new(sources: Vec<Box<dyn RecordStream>>, grouping: KeyGrouping) -> Self {
        let inputs = sources
            .into_iter()
            .enumerate()
            .map(|(i, stream)| {
                let label = format!("source {} ({})", i, stream.label());
                JoinInput {
                    stream: CheckedStream::new(stream, label),
                    head: None,
                }
            })
            .collect();
        Self {
            inputs,
            grouping,
            filter: None,
            cancel: None,
            primed: false,
            finished: false,
            emitted: 0,
            filtered: 0,
        }
    }

    pub fn with_filter(mut self, filter: Option<RehashFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn num_sources(&self) -> usize {
        self.inputs.len()
    }

    /// Co-groups emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Key groups dropped by the re-hash filter so far.
    pub fn filtered(&self) -> u64 {
        self.filtered
    }

    fn group_key(&self, key: &SortKey) -> SortKey {
        match self.grouping {
            KeyGrouping::Primary => SortKey::primary_only(key.primary.clone()),
            KeyGrouping::PrimaryAndSecondary => key.clone(),
        }
    }

    fn in_group(&self, key: &SortKey, group: &SortKey) -> bool {
        match self.grouping {
            KeyGrouping::Primary => key.primary == group.primary,
            KeyGrouping::PrimaryAndSecondary => key == group,
        }
    }

    fn advance(&mut self) -> Result<Option<CoGroup>> {
        if !self.primed {
            self.primed = true;
            for input in &mut self.inputs {
                input.head = input.stream.next_record()?;
            }
        }

        loop {
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return Err(BucketJoinError::Cancelled);
            }

            let Some(min) = self
                .inputs
                .iter()
                .filter_map(|input| input.head.as_ref())
                .map(|record| &record.key)
                .min()
            else {
                return Ok(None);
            };
            let group = self.group_key(min);

            let mut values = Vec::with_capacity(self.inputs.len());
            for i in 0..self.inputs.len() {
                let mut source_values = Vec::new();
                loop {
                    match self.inputs[i].head.take() {
                        Some(record) if self.in_group(&record.key, &group) => {
                            source_values.push(record.value);
                            self.inputs[i].head = self.inputs[i].stream.next_record()?;
                        }
                        other => {
                            self.inputs[i].head = other;
                            break;
                        }
                    }
                }
                values.push(source_values);
            }

            if let Some(filter) = &self.filter {
                if !filter.keeps(&group.primary) {
                    self.filtered += 1;
                    continue;
                }
            }

            self.emitted += 1;
            return Ok(Some(CoGroup {
                key: group.primary,
                secondary: group.secondary,
                values,
            }));
        }
    }
}

impl Iterator for MergeJoin {
    type Item = Result<CoGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.advance() {
            Ok(Some(group)) => Some(Ok(group)),
            Ok(None) => {
                self.finished = true;
                log::debug!(
                    "Merge finished: {} co-groups emitted, {} filtered",
                    self.emitted,
                    self.filtered
                );
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::VecStream;
    use crate::metadata::Utf8RecordCoder;

    fn source(label: &str, keys: &[u8]) -> Box<dyn RecordStream> {
        Box::new(VecStream::from_pairs(
            label,
            keys.iter()
                .enumerate()
                .map(|(i, k)| (vec![*k], format!("{}{}", label, i).into_bytes())),
        ))
    }

    fn keys_and_counts(groups: &[CoGroup]) -> Vec<(u8, Vec<usize>)> {
        groups
            .iter()
            .map(|g| (g.key[0], g.values.iter().map(Vec::len).collect()))
            .collect()
    }

    #[test]
    fn test_two_way_merge() {
        let join = MergeJoin::new(
            vec![source("a", &[1, 2, 2, 4]), source("b", &[2, 3, 4])],
            KeyGrouping::Primary,
        );
        let groups: Vec<CoGroup> = join.collect::<Result<_>>().unwrap();
        assert_eq!(
            keys_and_counts(&groups),
            vec![
                (1, vec![1, 0]),
                (2, vec![2, 1]),
                (3, vec![0, 1]),
                (4, vec![1, 1]),
            ]
        );
        // Duplicates keep source order.
        assert_eq!(groups[1].values[0], vec![b"a1".to_vec(), b"a2".to_vec()]);
        assert!(groups[1].is_inner());
        assert!(!groups[0].is_inner());
    }

    #[test]
    fn test_unsorted_source_fails_collected_join() {
        let join = MergeJoin::new(
            vec![source("a", &[2, 1, 3]), source("b", &[1])],
            KeyGrouping::Primary,
        );
        let err = join.collect::<Result<Vec<_>>>().unwrap_err();
        assert!(matches!(err, BucketJoinError::SortOrderViolation { ref source, .. } if source.starts_with("source 0")));
    }

    #[test]
    fn test_unsorted_source_fails_before_first_group_and_fuses() {
        let mut join = MergeJoin::new(vec![source("a", &[2, 1, 3])], KeyGrouping::Primary);
        assert!(matches!(
            join.next(),
            Some(Err(BucketJoinError::SortOrderViolation { .. }))
        ));
        assert!(join.next().is_none());
        assert_eq!(join.emitted(), 0);
    }

    #[test]
    fn test_empty_sources() {
        let mut join = MergeJoin::new(vec![source("a", &[]), source("b", &[])], KeyGrouping::Primary);
        assert!(join.next().is_none());
        assert_eq!(join.emitted(), 0);
    }

    #[test]
    fn test_cancellation_between_groups() {
        let token = CancellationToken::new();
        let mut join = MergeJoin::new(
            vec![source("a", &[1, 2, 3]), source("b", &[1, 2])],
            KeyGrouping::Primary,
        )
        .with_cancellation(token.clone());

        assert_eq!(join.next().unwrap().unwrap().key, vec![1]);
        token.cancel();
        assert!(matches!(join.next(), Some(Err(BucketJoinError::Cancelled))));
        assert!(join.next().is_none());
    }

    #[test]
    fn test_secondary_grouping() {
        let rec = |p: &str, s: &str, v: &str| {
            KeyedRecord::new(
                SortKey::new(p.as_bytes().to_vec(), Some(s.as_bytes().to_vec())),
                v.as_bytes().to_vec(),
            )
        };
        let a = vec![rec("k", "1", "a"), rec("k", "2", "b")];
        let b = vec![rec("k", "2", "c")];

        let by_primary: Vec<CoGroup> = MergeJoin::new(
            vec![
                Box::new(VecStream::new("a", a.clone())),
                Box::new(VecStream::new("b", b.clone())),
            ],
            KeyGrouping::Primary,
        )
        .collect::<Result<_>>()
        .unwrap();
        assert_eq!(by_primary.len(), 1);
        assert_eq!(by_primary[0].total_records(), 3);
        assert_eq!(by_primary[0].secondary, None);

        let by_both: Vec<CoGroup> = MergeJoin::new(
            vec![
                Box::new(VecStream::new("a", a)),
                Box::new(VecStream::new("b", b)),
            ],
            KeyGrouping::PrimaryAndSecondary,
        )
        .collect::<Result<_>>()
        .unwrap();
        assert_eq!(by_both.len(), 2);
        assert_eq!(by_both[0].secondary, Some(b"1".to_vec()));
        assert_eq!(by_both[1].values[1], vec![b"c".to_vec()]);
    }

    #[test]
    fn test_rehash_filter_drops_foreign_keys() {
        let keys: Vec<u8> = (0..32).collect();
        let filter = RehashFilter {
            hash_type: HashType::Murmur3_32,
            target_buckets: 4,
            target: 1,
        };
        let groups: Vec<CoGroup> = MergeJoin::new(vec![source("a", &keys)], KeyGrouping::Primary)
            .with_filter(Some(filter))
            .collect::<Result<_>>()
            .unwrap();
        let expected = keys.iter().filter(|k| filter.keeps(&[**k])).count();
        assert_eq!(groups.len(), expected);
        assert!(groups.iter().all(|g| filter.keeps(&g.key)));
    }

    #[test]
    fn test_decode() {
        let group = CoGroup {
            key: b"k".to_vec(),
            secondary: None,
            values: vec![vec![b"x".to_vec(), b"y".to_vec()], vec![]],
        };
        assert_eq!(group.source(0).map(<[_]>::len), Some(2));
        assert_eq!(group.source(2), None);
        let decoded: Vec<String> = group.decode(0, &Utf8RecordCoder).unwrap();
        assert_eq!(decoded, vec!["x".to_string(), "y".to_string()]);
        assert!(group.decode::<String, _>(1, &Utf8RecordCoder).unwrap().is_empty());
        assert!(group.decode::<String, _>(2, &Utf8RecordCoder).is_err());
    }
}
