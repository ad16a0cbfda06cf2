//! Join compatibility checks and join planning.
//!
//! All checks here run on metadata alone, before any bucket file is opened.

use std::str::FromStr;

use crate::error::{BucketJoinError, Result};
use crate::metadata::{BucketMetadata, HashType};

/// How co-groups are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyGrouping {
    /// One co-group per distinct primary key.
    #[default]
    Primary,
    /// One co-group per distinct (primary, secondary) key pair.
    PrimaryAndSecondary,
}

/// Number of target buckets a join iterates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetParallelism {
    /// Smallest bucket count among sources; no source is replicated.
    Min,
    /// Largest bucket count among sources. Default.
    #[default]
    Max,
    /// Custom power of two.
    Custom(u32),
}

impl FromStr for TargetParallelism {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "min" => Ok(TargetParallelism::Min),
            "max" => Ok(TargetParallelism::Max),
            other => other
                .parse::<u32>()
                .map(TargetParallelism::Custom)
                .map_err(|_| format!("expected 'min', 'max' or a power of two, got '{}'", s)),
        }
    }
}

/// Canonical plan of a bucketed join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPlan {
    target_buckets: u32,
    source_buckets: Vec<u32>,
    hash_type: HashType,
}

impl JoinPlan {
    /// Number of target buckets the join iterates (`0..target_buckets`).
    pub fn target_buckets(&self) -> u32 {
        self.target_buckets
    }

    pub fn num_sources(&self) -> usize {
        self.source_buckets.len()
    }

    pub fn hash_type(&self) -> HashType {
        self.hash_type
    }

    /// Bucket count of one source, `None` if `source` is out of range.
    pub fn source_num_buckets(&self, source: usize) -> Option<u32> {
        self.source_buckets.get(source).copied()
    }

    /// Ratio `max_buckets / own_buckets` for one source.
    pub fn ratio(&self, source: usize) -> Option<u32> {
        let own = self.source_num_buckets(source)?;
        let max = self.source_buckets.iter().copied().max().unwrap_or(own);
        Some(max / own)
    }

    /// Own buckets of `source` that feed target bucket `target`.
    ///
    /// A source with fewer buckets than the target count contributes one bucket,
    /// reused across target buckets. A source with more contributes every bucket
    /// congruent to `target` modulo the target count. `None` if `source` is out of
    /// range.
    pub fn source_buckets_for(&self, source: usize, target: u32) -> Option<Vec<u32>> {
        let own = self.source_num_buckets(source)?;
        let t = self.target_buckets;
        if own <= t {
            Some(vec![target % own])
        } else {
            Some((0..own / t).map(|k| target + k * t).collect())
        }
    }

    /// Whether some source is read for more than one target bucket, so that key
    /// groups must be re-hashed to the target count.
    pub fn requires_rehash(&self) -> bool {
        self.source_buckets
            .iter()
            .any(|&n| n < self.target_buckets)
    }

    /// Whether `primary_key` belongs to target bucket `target`.
    pub fn key_in_target(&self, primary_key: &[u8], target: u32) -> bool {
        self.hash_type.bucket(primary_key, self.target_buckets) == target
    }
}

/// Validate that every source can be joined with every other.
///
/// Checks, in order: hash type, key type, bucket count ratios. Returns the largest
/// bucket count.
pub fn check_compatibility(sources: &[&BucketMetadata], grouping: KeyGrouping) -> Result<u32> {
    let first = sources.first().ok_or_else(|| {
        BucketJoinError::invalid_metadata("a join needs at least one source".to_string())
    })?;

    for metadata in &sources[1..] {
        if metadata.hash_type() != first.hash_type() {
            return Err(BucketJoinError::IncompatibleHash {
                expected: first.hash_type().to_string(),
                actual: metadata.hash_type().to_string(),
            });
        }
    }

    let first_key = first.compatibility_key();
    for metadata in &sources[1..] {
        let key = metadata.compatibility_key();
        if key.key_type != first_key.key_type {
            return Err(BucketJoinError::IncompatibleKeyType {
                expected: first_key.key_type.clone(),
                actual: key.key_type,
            });
        }
    }

    if grouping == KeyGrouping::PrimaryAndSecondary {
        for metadata in sources {
            let key = metadata.compatibility_key();
            match (&first_key.secondary_key_type, &key.secondary_key_type) {
                (Some(expected), Some(actual)) if expected == actual => {}
                (expected, actual) => {
                    return Err(BucketJoinError::IncompatibleKeyType {
                        expected: format!("secondary {}", expected.as_deref().unwrap_or("<none>")),
                        actual: format!("secondary {}", actual.as_deref().unwrap_or("<none>")),
                    })
                }
            }
        }
    }

    let max_buckets = sources
        .iter()
        .map(|m| m.num_buckets())
        .max()
        .unwrap_or(1);
    for metadata in sources {
        let n = metadata.num_buckets();
        if n == 0 || max_buckets % n != 0 || !(max_buckets / n).is_power_of_two() {
            return Err(BucketJoinError::IncompatibleBucketCount {
                num_buckets: n,
                max_buckets,
            });
        }
    }

    Ok(max_buckets)
}

/// Check compatibility and build the join plan.
pub fn plan_join(
    sources: &[&BucketMetadata],
    grouping: KeyGrouping,
    parallelism: TargetParallelism,
) -> Result<JoinPlan> {
    let max_buckets = check_compatibility(sources, grouping)?;
    let min_buckets = sources
        .iter()
        .map(|m| m.num_buckets())
        .min()
        .unwrap_or(1);

    let target_buckets = match parallelism {
        TargetParallelism::Max => max_buckets,
        TargetParallelism::Min => min_buckets,
        TargetParallelism::Custom(n) => {
            if n == 0 || !n.is_power_of_two() {
                return Err(BucketJoinError::config(format!(
                    "target parallelism must be a power of two, got {}",
                    n
                )));
            }
            n
        }
    };

    let plan = JoinPlan {
        target_buckets,
        source_buckets: sources.iter().map(|m| m.num_buckets()).collect(),
        hash_type: sources[0].hash_type(),
    };
    log::debug!(
        "Join plan: {} sources, {} target buckets (rehash: {})",
        plan.num_sources(),
        plan.target_buckets,
        plan.requires_rehash()
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{CoderDescriptor, KeyDescriptor};

    fn meta(num_buckets: u32, hash: HashType, key_type: &str) -> BucketMetadata {
        BucketMetadata::try_new(
            num_buckets,
            1,
            hash,
            "bucket",
            KeyDescriptor::new("id", CoderDescriptor::deterministic(key_type)),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_ratio_four_is_compatible() {
        let a = meta(4, HashType::Murmur3_32, "utf8");
        let b = meta(16, HashType::Murmur3_32, "utf8");
        let plan = plan_join(&[&a, &b], KeyGrouping::Primary, TargetParallelism::Max).unwrap();
        assert_eq!(plan.target_buckets(), 16);
        assert_eq!(plan.ratio(0), Some(4));
        assert_eq!(plan.ratio(1), Some(1));
        assert!(plan.requires_rehash());
    }

    #[test]
    fn test_hash_mismatch() {
        let a = meta(4, HashType::Murmur3_32, "utf8");
        let c = meta(4, HashType::Crc32, "utf8");
        let err = check_compatibility(&[&a, &c], KeyGrouping::Primary).unwrap_err();
        assert!(matches!(err, BucketJoinError::IncompatibleHash { .. }));
    }

    #[test]
    fn test_key_type_mismatch() {
        let a = meta(4, HashType::Murmur3_32, "utf8");
        let b = meta(4, HashType::Murmur3_32, "u64be");
        let err = check_compatibility(&[&a, &b], KeyGrouping::Primary).unwrap_err();
        assert!(matches!(err, BucketJoinError::IncompatibleKeyType { .. }));
    }

    #[test]
    fn test_hash_checked_before_key_type() {
        let a = meta(4, HashType::Murmur3_32, "utf8");
        let b = meta(4, HashType::Crc32, "u64be");
        let err = check_compatibility(&[&a, &b], KeyGrouping::Primary).unwrap_err();
        assert!(matches!(err, BucketJoinError::IncompatibleHash { .. }));
    }

    #[test]
    fn test_secondary_grouping_requires_secondary_keys() {
        let a = meta(4, HashType::Murmur3_32, "utf8");
        let b = meta(4, HashType::Murmur3_32, "utf8");
        assert!(check_compatibility(&[&a, &b], KeyGrouping::Primary).is_ok());
        let err = check_compatibility(&[&a, &b], KeyGrouping::PrimaryAndSecondary).unwrap_err();
        assert!(matches!(err, BucketJoinError::IncompatibleKeyType { .. }));
    }

    #[test]
    fn test_source_buckets_for_max_parallelism() {
        let a = meta(2, HashType::Murmur3_32, "utf8");
        let b = meta(8, HashType::Murmur3_32, "utf8");
        let plan = plan_join(&[&a, &b], KeyGrouping::Primary, TargetParallelism::Max).unwrap();
        assert_eq!(plan.source_buckets_for(0, 5), Some(vec![1]));
        assert_eq!(plan.source_buckets_for(1, 5), Some(vec![5]));
    }

    #[test]
    fn test_source_buckets_for_min_parallelism() {
        let a = meta(2, HashType::Murmur3_32, "utf8");
        let b = meta(8, HashType::Murmur3_32, "utf8");
        let plan = plan_join(&[&a, &b], KeyGrouping::Primary, TargetParallelism::Min).unwrap();
        assert_eq!(plan.target_buckets(), 2);
        assert!(!plan.requires_rehash());
        assert_eq!(plan.source_buckets_for(0, 1), Some(vec![1]));
        assert_eq!(plan.source_buckets_for(1, 1), Some(vec![1, 3, 5, 7]));
    }

    #[test]
    fn test_out_of_range_source_is_none() {
        let a = meta(2, HashType::Murmur3_32, "utf8");
        let b = meta(8, HashType::Murmur3_32, "utf8");
        let plan = plan_join(&[&a, &b], KeyGrouping::Primary, TargetParallelism::Max).unwrap();
        assert_eq!(plan.source_num_buckets(1), Some(8));
        assert_eq!(plan.source_num_buckets(2), None);
        assert_eq!(plan.ratio(2), None);
        assert_eq!(plan.source_buckets_for(2, 0), None);
    }

    #[test]
    fn test_custom_parallelism_must_be_power_of_two() {
        let a = meta(4, HashType::Murmur3_32, "utf8");
        let err =
            plan_join(&[&a], KeyGrouping::Primary, TargetParallelism::Custom(6)).unwrap_err();
        assert!(matches!(err, BucketJoinError::Config(_)));
        let plan = plan_join(&[&a], KeyGrouping::Primary, TargetParallelism::Custom(8)).unwrap();
        assert_eq!(plan.source_buckets_for(0, 6), Some(vec![2]));
    }

    #[test]
    fn test_parse_parallelism() {
        assert_eq!("min".parse(), Ok(TargetParallelism::Min));
        assert_eq!("MAX".parse(), Ok(TargetParallelism::Max));
        assert_eq!("32".parse(), Ok(TargetParallelism::Custom(32)));
        assert!("lots".parse::<TargetParallelism>().is_err());
    }
}
