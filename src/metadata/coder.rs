//! Key and record codecs.
//!
//! Keys are compared and hashed only as serialized bytes, so a [`KeyCoder`] must be
//! deterministic: two equal keys always encode to identical bytes. The built-in
//! numeric coders are also order-preserving (big-endian, sign bit flipped for
//! signed values) so that byte order matches numeric order.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BucketJoinError, Result};

/// Identifies a key coder in the metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoderDescriptor {
    /// Key type identifier (e.g. "utf8", "u64be").
    pub type_name: String,
    /// Whether equal keys always encode to identical bytes.
    pub deterministic: bool,
}

impl CoderDescriptor {
    pub fn deterministic(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            deterministic: true,
        }
    }
}

impl fmt::Display for CoderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name)
    }
}

/// Serializes keys of type `K` to bytes.
pub trait KeyCoder<K>: Send + Sync {
    fn encode(&self, key: &K) -> Vec<u8>;
    fn descriptor(&self) -> CoderDescriptor;
}

/// Serializes records of type `R` to and from bucket file payloads.
pub trait RecordCoder<R>: Send + Sync {
    fn encode(&self, record: &R) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<R>;
}

/// Encode `sample` twice and fail if the bytes differ.
pub fn probe_deterministic<K, C: KeyCoder<K> + ?Sized>(coder: &C, sample: &K) -> Result<()> {
    let first = coder.encode(sample);
    let second = coder.encode(sample);
    if first != second {
        return Err(BucketJoinError::invalid_metadata(format!(
            "key coder '{}' is not deterministic: encoding the same key twice produced different bytes",
            coder.descriptor()
        )));
    }
    Ok(())
}

// ============================================================================
// Built-in key coders
// ============================================================================

/// UTF-8 bytes of a string key.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCoder;

impl KeyCoder<String> for StringCoder {
    fn encode(&self, key: &String) -> Vec<u8> {
        key.as_bytes().to_vec()
    }

    fn descriptor(&self) -> CoderDescriptor {
        CoderDescriptor::deterministic("utf8")
    }
}

/// Big-endian unsigned 64-bit key.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64Coder;

impl KeyCoder<u64> for U64Coder {
    fn encode(&self, key: &u64) -> Vec<u8> {
        key.to_be_bytes().to_vec()
    }

    fn descriptor(&self) -> CoderDescriptor {
        CoderDescriptor::deterministic("u64be")
    }
}

/// Big-endian signed 64-bit key with the sign bit flipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Coder;

impl KeyCoder<i64> for I64Coder {
    fn encode(&self, key: &i64) -> Vec<u8> {
        ((*key as u64) ^ (1 << 63)).to_be_bytes().to_vec()
    }

    fn descriptor(&self) -> CoderDescriptor {
        CoderDescriptor::deterministic("i64be")
    }
}

/// Raw byte keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCoder;

impl KeyCoder<Vec<u8>> for BytesCoder {
    fn encode(&self, key: &Vec<u8>) -> Vec<u8> {
        key.clone()
    }

    fn descriptor(&self) -> CoderDescriptor {
        CoderDescriptor::deterministic("bytes")
    }
}

// ============================================================================
// Built-in record coders
// ============================================================================

/// Stores `String` records as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8RecordCoder;

impl RecordCoder<String> for Utf8RecordCoder {
    fn encode(&self, record: &String) -> Result<Vec<u8>> {
        Ok(record.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| BucketJoinError::codec(format!("record is not valid UTF-8: {}", e)))
    }
}

/// Stores byte records unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesRecordCoder;

impl RecordCoder<Vec<u8>> for BytesRecordCoder {
    fn encode(&self, record: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(record.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Appends a call counter, so equal keys encode differently.
    struct CountingCoder(AtomicU32);

    impl KeyCoder<String> for CountingCoder {
        fn encode(&self, key: &String) -> Vec<u8> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            let mut out = key.as_bytes().to_vec();
            out.extend_from_slice(&n.to_be_bytes());
            out
        }

        fn descriptor(&self) -> CoderDescriptor {
            CoderDescriptor::deterministic("counting")
        }
    }

    #[test]
    fn test_numeric_coders_preserve_order() {
        let values = [0u64, 1, 2, 255, 256, u64::MAX];
        for w in values.windows(2) {
            assert!(U64Coder.encode(&w[0]) < U64Coder.encode(&w[1]));
        }

        let signed = [i64::MIN, -1000, -1, 0, 1, 42, i64::MAX];
        for w in signed.windows(2) {
            assert!(I64Coder.encode(&w[0]) < I64Coder.encode(&w[1]));
        }
    }

    #[test]
    fn test_probe_deterministic() {
        assert!(probe_deterministic(&StringCoder, &"user-1".to_string()).is_ok());

        let bad = CountingCoder(AtomicU32::new(0));
        let err = probe_deterministic(&bad, &"user-1".to_string()).unwrap_err();
        assert!(matches!(err, BucketJoinError::InvalidMetadata(_)));
    }

    #[test]
    fn test_utf8_record_coder_rejects_invalid_bytes() {
        assert_eq!(Utf8RecordCoder.decode(b"abc").unwrap(), "abc");
        assert!(Utf8RecordCoder.decode(&[0xff, 0xfe]).is_err());
    }
}
