//! Bucket hash functions.
//!
//! Bucket assignment must be bit-for-bit identical across independent writer
//! processes, so every hash here is a fixed, seeded function of the key bytes.
//! Process-randomized hashers (`std::collections::hash_map::DefaultHasher`,
//! `ahash`) must never be used for bucketing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::BUCKET_HASH_SEED;

/// Hash algorithm identifier stored in the metadata document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HashType {
    /// 32-bit x86 murmur3, seed 0. Default.
    #[default]
    #[serde(rename = "murmur3_32")]
    Murmur3_32,
    /// CRC-32 (IEEE polynomial).
    #[serde(rename = "crc32")]
    Crc32,
}

impl HashType {
    /// Hash key bytes with this algorithm.
    pub fn hash(&self, bytes: &[u8]) -> u32 {
        match self {
            HashType::Murmur3_32 => murmur3_32(bytes, BUCKET_HASH_SEED),
            HashType::Crc32 => crc32fast::hash(bytes),
        }
    }

    /// Bucket of `bytes` among `num_buckets` (a power of two).
    #[inline]
    pub fn bucket(&self, bytes: &[u8], num_buckets: u32) -> u32 {
        debug_assert!(num_buckets.is_power_of_two());
        self.hash(bytes) & (num_buckets - 1)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HashType::Murmur3_32 => "murmur3_32",
            HashType::Crc32 => "crc32",
        }
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "murmur3_32" | "murmur3" => Ok(HashType::Murmur3_32),
            "crc32" => Ok(HashType::Crc32),
            other => Err(format!(
                "unknown hash type '{}' (expected murmur3_32 or crc32)",
                other
            )),
        }
    }
}

/// 32-bit murmur3 (x86 variant).
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h = seed;
    let chunks = data.chunks_exact(4);
    let tail = chunks.remainder();

    for chunk in chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);

        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let mut k = 0u32;
    if tail.len() >= 3 {
        k ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        k ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        k ^= tail[0] as u32;
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        h ^= k;
    }

    h ^= data.len() as u32;
    fmix32(h)
}

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur3_reference_vectors() {
        assert_eq!(murmur3_32(b"", 0), 0);
        assert_eq!(murmur3_32(b"", 1), 0x514e_28b7);
        assert_eq!(murmur3_32(b"", 0xffff_ffff), 0x81f1_6f39);
        assert_eq!(murmur3_32(&[0, 0, 0, 0], 0), 0x2362_f9de);
    }

    #[test]
    fn test_crc32_reference_vector() {
        assert_eq!(HashType::Crc32.hash(b"123456789"), 0xcbf4_3926);
    }

    #[test]
    fn test_bucket_is_consistent_modulo_smaller_count() {
        // Co-partitioning relies on this: bucket under N/2^k equals bucket under N mod N/2^k.
        for key in [&b"alpha"[..], b"beta", b"gamma", b"\x00\x01", b""] {
            for hash in [HashType::Murmur3_32, HashType::Crc32] {
                let b16 = hash.bucket(key, 16);
                let b4 = hash.bucket(key, 4);
                assert_eq!(b16 % 4, b4);
                assert!(b16 < 16);
            }
        }
    }

    #[test]
    fn test_hash_type_parse() {
        assert_eq!("murmur3-32".parse::<HashType>(), Ok(HashType::Murmur3_32));
        assert_eq!("CRC32".parse::<HashType>(), Ok(HashType::Crc32));
        assert!("md5".parse::<HashType>().is_err());
        assert_eq!(HashType::Crc32.to_string(), "crc32");
    }
}
