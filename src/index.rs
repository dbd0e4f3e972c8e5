//! Per-file index structures and the persisted index section.
//!
//! The index section is a self-describing JSON document written once at file
//! close, directly before the footer.  Field names are stable and versioned;
//! a `1.x` reader must be able to decode any `1.x` document.
//!
//! Top-level keys:
//!   - `format_version`
//!   - `block_metadata`        — one [`BlockMetadata`] per block, id order
//!   - `inverted_indexes`      — value → block-id lists for kind/namespace/group
//!   - `statistics`            — whole-file totals
//!   - `final_resource_states` — last known state per resource key (see `state.rs`)

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::bloom::BloomFilter;
use crate::codec::compression_ratio;
use crate::error::{Result, StoreError};
use crate::event::{hex_bytes, EventType};
use crate::query::QueryFilters;

/// Version string written into every index section.
pub const INDEX_FORMAT_VERSION: &str = "1.0";

// ── BlockMetadata ────────────────────────────────────────────────────────────

/// Descriptor of one finalized block, kept in memory while the file is open
/// and persisted in the index section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// Zero-based, dense, monotone within a file.
    pub id:                  u32,
    /// Absolute byte offset of the compressed block.
    pub offset:              u64,
    pub compressed_length:   u64,
    pub uncompressed_length: u64,
    pub event_count:         u64,
    pub timestamp_min:       i64,
    pub timestamp_max:       i64,
    /// Exact distinct values per categorical attribute.
    pub kinds:               BTreeSet<String>,
    pub namespaces:          BTreeSet<String>,
    pub groups:              BTreeSet<String>,
    /// Probabilistic counterparts of the exact sets.
    pub kind_filter:         BloomFilter,
    pub namespace_filter:    BloomFilter,
    pub group_filter:        BloomFilter,
    /// Hex checksum of the decompressed frame; empty when disabled.
    #[serde(default)]
    pub checksum:            String,
}

impl BlockMetadata {
    /// Whether this block's time bounds overlap `[start, end]` (nanos).
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.timestamp_min <= end && self.timestamp_max >= start
    }
}

// ── InvertedIndex ────────────────────────────────────────────────────────────

/// Per-file mapping from categorical attribute values to block ids.
/// Derived deterministically from block metadata at close or restore time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvertedIndex {
    pub kind_to_blocks:      BTreeMap<String, Vec<u32>>,
    pub namespace_to_blocks: BTreeMap<String, Vec<u32>>,
    pub group_to_blocks:     BTreeMap<String, Vec<u32>>,
}

impl InvertedIndex {
    pub fn from_blocks(blocks: &[BlockMetadata]) -> Self {
        let mut idx = InvertedIndex::default();
        for b in blocks {
            for kind in &b.kinds {
                idx.kind_to_blocks.entry(kind.clone()).or_default().push(b.id);
            }
            for ns in &b.namespaces {
                idx.namespace_to_blocks.entry(ns.clone()).or_default().push(b.id);
            }
            for group in &b.groups {
                idx.group_to_blocks.entry(group.clone()).or_default().push(b.id);
            }
        }
        idx
    }

    /// Intersect the block-id lists for every filter present.
    ///
    /// Returns `None` when no filter is given — "no pruning performed", the
    /// caller scans all blocks.  Returns `Some(empty)` when a filter value is
    /// absent from its map — definitely zero candidates.  The two sentinels
    /// are distinct on purpose.
    pub fn candidate_blocks(&self, filters: &QueryFilters) -> Option<Vec<u32>> {
        let mut lists: Vec<&[u32]> = Vec::new();

        if let Some(kind) = &filters.kind {
            match self.kind_to_blocks.get(kind) {
                Some(ids) => lists.push(ids),
                None      => return Some(Vec::new()),
            }
        }
        if let Some(ns) = &filters.namespace {
            match self.namespace_to_blocks.get(ns) {
                Some(ids) => lists.push(ids),
                None      => return Some(Vec::new()),
            }
        }
        if let Some(group) = &filters.group {
            match self.group_to_blocks.get(group) {
                Some(ids) => lists.push(ids),
                None      => return Some(Vec::new()),
            }
        }

        if lists.is_empty() {
            return None;
        }

        // AND semantics: keep ids present in every list.
        let mut result: Vec<u32> = lists[0].to_vec();
        for list in &lists[1..] {
            let members: BTreeSet<u32> = list.iter().copied().collect();
            result.retain(|id| members.contains(id));
        }
        result.dedup();
        Some(result)
    }
}

// ── FileStatistics ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileStatistics {
    pub total_blocks:             u64,
    pub total_events:             u64,
    pub total_uncompressed_bytes: u64,
    pub total_compressed_bytes:   u64,
    pub compression_ratio:        f64,
    pub unique_kinds:             u64,
    pub unique_namespaces:        u64,
    pub unique_groups:            u64,
    pub timestamp_min:            i64,
    pub timestamp_max:            i64,
}

impl FileStatistics {
    pub fn from_blocks(blocks: &[BlockMetadata]) -> Self {
        let mut kinds      = BTreeSet::new();
        let mut namespaces = BTreeSet::new();
        let mut groups     = BTreeSet::new();
        let mut stats = FileStatistics {
            total_blocks: blocks.len() as u64,
            ..Default::default()
        };

        for (i, b) in blocks.iter().enumerate() {
            stats.total_events             += b.event_count;
            stats.total_uncompressed_bytes += b.uncompressed_length;
            stats.total_compressed_bytes   += b.compressed_length;
            kinds.extend(b.kinds.iter().cloned());
            namespaces.extend(b.namespaces.iter().cloned());
            groups.extend(b.groups.iter().cloned());

            if i == 0 {
                stats.timestamp_min = b.timestamp_min;
                stats.timestamp_max = b.timestamp_max;
            } else {
                stats.timestamp_min = stats.timestamp_min.min(b.timestamp_min);
                stats.timestamp_max = stats.timestamp_max.max(b.timestamp_max);
            }
        }

        stats.unique_kinds      = kinds.len() as u64;
        stats.unique_namespaces = namespaces.len() as u64;
        stats.unique_groups     = groups.len() as u64;
        stats.compression_ratio = compression_ratio(
            stats.total_uncompressed_bytes as usize,
            stats.total_compressed_bytes as usize,
        );
        stats
    }
}

// ── Final resource states ────────────────────────────────────────────────────

/// Last known state of one resource; the consistent-view table value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub uid:        String,
    pub event_type: EventType,
    /// Timestamp (nanos) of the last event observed for this resource.
    pub timestamp:  i64,
    /// Opaque payload of that event.
    #[serde(with = "hex_bytes")]
    pub resource_data: Vec<u8>,
}

/// Keyed by `{group}/{version}/{kind}/{namespace}/{name}`.
pub type FinalResourceStates = BTreeMap<String, ResourceState>;

// ── IndexSection ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSection {
    pub format_version:        String,
    pub block_metadata:        Vec<BlockMetadata>,
    pub inverted_indexes:      InvertedIndex,
    pub statistics:            FileStatistics,
    pub final_resource_states: FinalResourceStates,
}

impl IndexSection {
    pub fn new(
        block_metadata:        Vec<BlockMetadata>,
        final_resource_states: FinalResourceStates,
    ) -> Self {
        let inverted_indexes = InvertedIndex::from_blocks(&block_metadata);
        let statistics       = FileStatistics::from_blocks(&block_metadata);
        Self {
            format_version: INDEX_FORMAT_VERSION.to_owned(),
            block_metadata,
            inverted_indexes,
            statistics,
            final_resource_states,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StoreError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Encoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::{BloomBuilder, BLOOM_FP_RATE};

    fn block(id: u32, kinds: &[&str], namespaces: &[&str]) -> BlockMetadata {
        let mut kind_filter = BloomBuilder::new(16, BLOOM_FP_RATE).unwrap();
        for k in kinds {
            kind_filter.insert(k);
        }
        BlockMetadata {
            id,
            offset:              77 + u64::from(id) * 100,
            compressed_length:   100,
            uncompressed_length: 300,
            event_count:         2,
            timestamp_min:       i64::from(id) * 1_000,
            timestamp_max:       i64::from(id) * 1_000 + 500,
            kinds:               kinds.iter().map(|s| s.to_string()).collect(),
            namespaces:          namespaces.iter().map(|s| s.to_string()).collect(),
            groups:              BTreeSet::from(["apps".to_string()]),
            kind_filter:         kind_filter.freeze(),
            namespace_filter:    BloomFilter::default(),
            group_filter:        BloomFilter::default(),
            checksum:            String::new(),
        }
    }

    fn three_block_index() -> InvertedIndex {
        InvertedIndex::from_blocks(&[
            block(0, &["Pod", "Service"], &["default", "kube-system"]),
            block(1, &["Pod", "Deployment"], &["default"]),
            block(2, &["Service"], &["kube-system"]),
        ])
    }

    #[test]
    fn candidate_intersection() {
        let idx = three_block_index();
        let got = idx
            .candidate_blocks(&QueryFilters {
                kind:      Some("Pod".into()),
                namespace: Some("default".into()),
                group:     None,
            })
            .unwrap();
        assert_eq!(got, vec![0, 1]);
    }

    #[test]
    fn missing_value_is_empty_not_none() {
        let idx = three_block_index();
        let got = idx.candidate_blocks(&QueryFilters {
            kind:      Some("NonExistent".into()),
            namespace: None,
            group:     None,
        });
        assert_eq!(got, Some(Vec::new()));
    }

    #[test]
    fn no_filters_means_no_pruning() {
        let idx = three_block_index();
        assert_eq!(idx.candidate_blocks(&QueryFilters::default()), None);
    }

    #[test]
    fn statistics_sum_over_blocks() {
        let blocks = vec![
            block(0, &["Pod"], &["default"]),
            block(1, &["Service"], &["default"]),
        ];
        let stats = FileStatistics::from_blocks(&blocks);
        assert_eq!(stats.total_blocks, 2);
        assert_eq!(stats.total_events, 4);
        assert_eq!(stats.total_uncompressed_bytes, 600);
        assert_eq!(stats.total_compressed_bytes, 200);
        assert_eq!(stats.unique_kinds, 2);
        assert_eq!(stats.unique_namespaces, 1);
        assert_eq!(stats.timestamp_min, 0);
        assert_eq!(stats.timestamp_max, 1_500);
    }

    #[test]
    fn index_section_round_trip() {
        let section = IndexSection::new(
            vec![block(0, &["Pod"], &["default"])],
            FinalResourceStates::new(),
        );
        let bytes = section.to_bytes().unwrap();
        let back = IndexSection::from_bytes(&bytes).unwrap();
        assert_eq!(back, section);

        // Stable top-level key names.
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        for key in [
            "format_version",
            "block_metadata",
            "inverted_indexes",
            "statistics",
            "final_resource_states",
        ] {
            assert!(doc.get(key).is_some(), "missing key {key}");
        }
        assert!(doc["inverted_indexes"].get("kind_to_blocks").is_some());
        assert!(doc["statistics"].get("total_uncompressed_bytes").is_some());
    }
}
