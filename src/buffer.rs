//! In-memory accumulator for the currently open block.
//!
//! The buffer tracks everything block metadata needs while events stream in:
//! payload byte count against the size watermark, timestamp bounds, the exact
//! value sets, and the Bloom filters.  `finalize` turns the accumulated
//! events into the uncompressed block frame plus a [`BlockMetadata`] whose
//! `offset` and `compressed_length` are still zero — compression and
//! placement are the writer's job, so the buffer and the codec stay
//! independently testable.
//!
//! Size rule: the first event is always accepted regardless of size; after
//! that, an event that would push `current_size` past the threshold forces
//! the block to roll.

use std::collections::BTreeSet;

use crate::bloom::{
    BloomBuilder, BLOOM_FP_RATE, GROUP_CAPACITY, KIND_CAPACITY, NAMESPACE_CAPACITY,
};
use crate::error::{Result, StoreError};
use crate::event::{encode_frame, EncodingFormat, Event};
use crate::index::BlockMetadata;

pub struct EventBuffer {
    events:       Vec<Event>,
    current_size: u64,
    threshold:    u64,
    encoding:     EncodingFormat,

    timestamp_min: i64,
    timestamp_max: i64,

    kinds:      BTreeSet<String>,
    namespaces: BTreeSet<String>,
    groups:     BTreeSet<String>,

    kind_filter:      BloomBuilder,
    namespace_filter: BloomBuilder,
    group_filter:     BloomBuilder,
}

impl EventBuffer {
    pub fn new(threshold: u64, encoding: EncodingFormat) -> Result<Self> {
        Ok(Self {
            events:       Vec::new(),
            current_size: 0,
            threshold,
            encoding,
            timestamp_min: i64::MAX,
            timestamp_max: i64::MIN,
            kinds:      BTreeSet::new(),
            namespaces: BTreeSet::new(),
            groups:     BTreeSet::new(),
            kind_filter:      BloomBuilder::new(KIND_CAPACITY, BLOOM_FP_RATE)?,
            namespace_filter: BloomBuilder::new(NAMESPACE_CAPACITY, BLOOM_FP_RATE)?,
            group_filter:     BloomBuilder::new(GROUP_CAPACITY, BLOOM_FP_RATE)?,
        })
    }

    /// True iff the buffer is non-empty and `next_event_size` would push it
    /// past the threshold.  Always false on an empty buffer.
    pub fn is_full(&self, next_event_size: u64) -> bool {
        !self.events.is_empty() && self.current_size + next_event_size > self.threshold
    }

    /// Append an event unconditionally and fold it into the running metadata.
    /// Callers gate on [`is_full`](Self::is_full) first.
    pub fn push(&mut self, event: Event) {
        self.current_size += event.payload_size();
        self.timestamp_min = self.timestamp_min.min(event.timestamp);
        self.timestamp_max = self.timestamp_max.max(event.timestamp);

        let r = &event.resource;
        if self.kinds.insert(r.kind.clone()) {
            self.kind_filter.insert(&r.kind);
        }
        if self.namespaces.insert(r.namespace.clone()) {
            self.namespace_filter.insert(&r.namespace);
        }
        if self.groups.insert(r.group.clone()) {
            self.group_filter.insert(&r.group);
        }

        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    /// Buffered events, in insertion order.  Used by the in-memory read path
    /// for the open block.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Encode the buffered events into the uncompressed block frame and
    /// produce metadata for block `block_id`.
    ///
    /// `offset` and `compressed_length` in the returned metadata are zero;
    /// the writer fills them after compressing and placing the frame.  The
    /// buffer resets to empty on success.
    pub fn finalize(
        &mut self,
        block_id:         u32,
        checksum_enabled: bool,
    ) -> Result<(BlockMetadata, Vec<u8>)> {
        if self.events.is_empty() {
            return Err(StoreError::EmptyBuffer);
        }

        let frame = encode_frame(&self.events, self.encoding)?;
        let checksum = if checksum_enabled {
            blake3::hash(&frame).to_hex().to_string()
        } else {
            String::new()
        };

        let metadata = BlockMetadata {
            id:                  block_id,
            offset:              0,
            compressed_length:   0,
            uncompressed_length: frame.len() as u64,
            event_count:         self.events.len() as u64,
            timestamp_min:       self.timestamp_min,
            timestamp_max:       self.timestamp_max,
            kinds:               std::mem::take(&mut self.kinds),
            namespaces:          std::mem::take(&mut self.namespaces),
            groups:              std::mem::take(&mut self.groups),
            kind_filter:         self.kind_filter.freeze(),
            namespace_filter:    self.namespace_filter.freeze(),
            group_filter:        self.group_filter.freeze(),
            checksum,
        };

        self.reset()?;
        Ok((metadata, frame))
    }

    fn reset(&mut self) -> Result<()> {
        self.events.clear();
        self.current_size  = 0;
        self.timestamp_min = i64::MAX;
        self.timestamp_max = i64::MIN;
        self.kinds.clear();
        self.namespaces.clear();
        self.groups.clear();
        self.kind_filter      = BloomBuilder::new(KIND_CAPACITY, BLOOM_FP_RATE)?;
        self.namespace_filter = BloomBuilder::new(NAMESPACE_CAPACITY, BLOOM_FP_RATE)?;
        self.group_filter     = BloomBuilder::new(GROUP_CAPACITY, BLOOM_FP_RATE)?;
        Ok(())
    }
}
