//! Key extraction strategies.
//!
//! A dataset's key logic is plain data: a descriptor per key (what is extracted and
//! how it is encoded) plus a closure per key that extracts and encodes it. The
//! closures are type-erased to `Fn(&R) -> Option<Vec<u8>>` so that metadata,
//! assignment and merging deal only in bytes.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use super::coder::{CoderDescriptor, KeyCoder};
use crate::error::{BucketJoinError, Result};

/// Describes one key of a dataset in the metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyDescriptor {
    /// Free-form name of the extracted field (e.g. "user_id", "column:0").
    #[serde(default)]
    pub field: String,
    pub coder: CoderDescriptor,
}

impl KeyDescriptor {
    pub fn new(field: impl Into<String>, coder: CoderDescriptor) -> Self {
        Self {
            field: field.into(),
            coder,
        }
    }
}

type ExtractFn<R> = Arc<dyn Fn(&R) -> Option<Vec<u8>> + Send + Sync>;

/// Extracts and encodes the primary and (optional) secondary key of a record.
pub struct KeyStrategy<R> {
    primary: KeyDescriptor,
    extract_primary: ExtractFn<R>,
    secondary: Option<(KeyDescriptor, ExtractFn<R>)>,
}

impl<R> Clone for KeyStrategy<R> {
    fn clone(&self) -> Self {
        Self {
            primary: self.primary.clone(),
            extract_primary: Arc::clone(&self.extract_primary),
            secondary: self
                .secondary
                .as_ref()
                .map(|(d, f)| (d.clone(), Arc::clone(f))),
        }
    }
}

impl<R> fmt::Debug for KeyStrategy<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStrategy")
            .field("primary", &self.primary)
            .field("secondary", &self.secondary.as_ref().map(|(d, _)| d))
            .finish()
    }
}

fn erase<R, K, C, F>(coder: C, extract: F) -> ExtractFn<R>
where
    C: KeyCoder<K> + 'static,
    F: Fn(&R) -> Option<K> + Send + Sync + 'static,
    K: 'static,
    R: 'static,
{
    Arc::new(move |record: &R| extract(record).map(|key| coder.encode(&key)))
}

fn require_deterministic(descriptor: &CoderDescriptor, role: &str) -> Result<()> {
    if !descriptor.deterministic {
        return Err(BucketJoinError::invalid_metadata(format!(
            "{} key coder '{}' is not deterministic",
            role, descriptor.type_name
        )));
    }
    Ok(())
}

impl<R> KeyStrategy<R> {
    /// Primary-key-only strategy.
    ///
    /// `extract` returns `None` when the record has no derivable key; such records
    /// are routed to the writer's side output.
    pub fn new<K, C, F>(field: impl Into<String>, coder: C, extract: F) -> Result<Self>
    where
        C: KeyCoder<K> + 'static,
        F: Fn(&R) -> Option<K> + Send + Sync + 'static,
        K: 'static,
        R: 'static,
    {
        let descriptor = KeyDescriptor::new(field, coder.descriptor());
        require_deterministic(&descriptor.coder, "primary")?;
        Ok(Self {
            primary: descriptor,
            extract_primary: erase(coder, extract),
            secondary: None,
        })
    }

    /// Add a secondary key.
    pub fn with_secondary<K, C, F>(
        mut self,
        field: impl Into<String>,
        coder: C,
        extract: F,
    ) -> Result<Self>
    where
        C: KeyCoder<K> + 'static,
        F: Fn(&R) -> Option<K> + Send + Sync + 'static,
        K: 'static,
        R: 'static,
    {
        let descriptor = KeyDescriptor::new(field, coder.descriptor());
        require_deterministic(&descriptor.coder, "secondary")?;
        self.secondary = Some((descriptor, erase(coder, extract)));
        Ok(self)
    }

    pub fn primary_descriptor(&self) -> &KeyDescriptor {
        &self.primary
    }

    pub fn secondary_descriptor(&self) -> Option<&KeyDescriptor> {
        self.secondary.as_ref().map(|(d, _)| d)
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    /// Encoded primary key, or `None` if the record has none.
    pub fn primary(&self, record: &R) -> Option<Vec<u8>> {
        (self.extract_primary)(record)
    }

    /// Encoded secondary key.
    ///
    /// Fails with `UnsupportedOperation` if the strategy has no secondary key.
    pub fn secondary(&self, record: &R) -> Result<Option<Vec<u8>>> {
        match &self.secondary {
            Some((_, extract)) => Ok(extract(record)),
            None => Err(BucketJoinError::unsupported(format!(
                "dataset keyed on '{}' defines no secondary key",
                self.primary.field
            ))),
        }
    }
}

// ============================================================================
// Sort keys
// ============================================================================

/// Byte-wise sort key of a record: primary bytes, then secondary bytes.
///
/// Ordering is lexicographic on bytes; an absent secondary key sorts before any
/// present one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SortKey {
    pub primary: Vec<u8>,
    pub secondary: Option<Vec<u8>>,
}

impl SortKey {
    pub fn new(primary: Vec<u8>, secondary: Option<Vec<u8>>) -> Self {
        Self { primary, secondary }
    }

    pub fn primary_only(primary: impl Into<Vec<u8>>) -> Self {
        Self {
            primary: primary.into(),
            secondary: None,
        }
    }

    /// Concatenated bytes used in diagnostics.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.primary.clone();
        if let Some(s) = &self.secondary {
            out.push(0);
            out.extend_from_slice(s);
        }
        out
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.primary
            .as_slice()
            .cmp(other.primary.as_slice())
            .then_with(|| self.secondary.cmp(&other.secondary))
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
