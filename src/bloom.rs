//! Per-block Bloom filters over the three categorical attributes.
//!
//! Each block carries one filter per attribute (kind, namespace, group) so a
//! reader can cheaply exclude blocks before decompressing anything.  Sizing
//! follows the standard formulas — `k = ⌈-log₂(p)⌉` hash functions and
//! `m = ⌈-(n·ln p)/(ln 2)²⌉` bits — which is exactly what
//! `bloomfilter::Bloom::new_for_fp_rate` computes from `(n, p)`.
//!
//! Two shapes exist on purpose:
//!   - [`BloomBuilder`] — the live, mutable filter owned by the event buffer
//!     while a block is open.
//!   - [`BloomFilter`] — the frozen byte form stored in block metadata and
//!     serialized (hex) into the index section.  Membership checks
//!     reconstruct the filter from its bytes; a filter that fails to parse
//!     answers "maybe present", never "absent".

use bloomfilter::Bloom;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, StoreError};

/// Target false-positive probability for all three filters.
pub const BLOOM_FP_RATE: f64 = 0.05;

/// Expected distinct resource kinds per file.
pub const KIND_CAPACITY: usize = 1000;
/// Expected distinct namespaces per file.
pub const NAMESPACE_CAPACITY: usize = 100;
/// Expected distinct API groups per file.
pub const GROUP_CAPACITY: usize = 100;

// ── BloomBuilder ─────────────────────────────────────────────────────────────

/// Mutable filter used while a block is being filled.
pub struct BloomBuilder {
    inner: Bloom<str>,
}

impl BloomBuilder {
    pub fn new(expected_items: usize, fp_rate: f64) -> Result<Self> {
        let inner = Bloom::new_for_fp_rate(expected_items.max(1), fp_rate)
            .map_err(|e| StoreError::Encoding(format!("bloom filter sizing: {e}")))?;
        Ok(Self { inner })
    }

    pub fn insert(&mut self, value: &str) {
        self.inner.set(value);
    }

    pub fn contains(&self, value: &str) -> bool {
        self.inner.check(value)
    }

    /// Freeze into the serializable byte form.
    pub fn freeze(&self) -> BloomFilter {
        BloomFilter {
            data: self.inner.as_slice().to_vec(),
        }
    }
}

// ── BloomFilter (frozen) ─────────────────────────────────────────────────────

/// Frozen filter bytes as persisted in the index section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BloomFilter {
    data: Vec<u8>,
}

impl BloomFilter {
    /// Membership test against the frozen bytes.
    ///
    /// Returns `true` ("maybe present") when the filter is empty or cannot be
    /// parsed — a damaged filter must never exclude a block.
    pub fn contains(&self, value: &str) -> bool {
        if self.data.is_empty() {
            return true;
        }
        match Bloom::from_slice(&self.data) {
            Ok(bloom) => bloom.check(value),
            Err(_)    => true,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }
}

// Persisted as a hex string so the index section stays a readable document.
impl Serialize for BloomFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.data))
    }
}

impl<'de> Deserialize<'de> for BloomFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let data = hex::decode(&s).map_err(D::Error::custom)?;
        Ok(Self { data })
    }
}
