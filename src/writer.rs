//! `BlockStorageFile` — single-writer append path for one hourly file.
//!
//! # Lifecycle
//!
//! ```text
//! Open (create)   — write the 77-byte header, start with block id 0
//! Open (restore)  — footer → index section → blocks, states, next id;
//!                   the old index section and footer get overwritten on Close
//! WriteEvent      — buffer; on watermark overflow finalize → compress →
//!                   append block; update the final-states table per event
//! Close           — flush open buffer, write index section + fresh footer
//! ```
//!
//! A restored writer produces, on Close, a file indistinguishable from one
//! written in a single session.  Restore refuses files without a valid
//! footer (`CorruptFile`) — crash recovery by forward scan is deliberately
//! not attempted.
//!
//! The struct is not internally locked; `Storage` serializes access.  One
//! writer per file per process; multi-process writers are unsupported and
//! undetected.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::buffer::EventBuffer;
use crate::codec::{self, get_codec, Codec, Compression};
use crate::error::{Result, StoreError};
use crate::event::{decode_frame, EncodingFormat, Event};
use crate::format::{
    footer_spans_file, FileFooter, FileHeader, DEFAULT_BLOCK_SIZE_THRESHOLD, FILE_HEADER_SIZE,
};
use crate::index::{
    BlockMetadata, FileStatistics, FinalResourceStates, IndexSection, InvertedIndex,
};
use crate::state;

// ── Options ──────────────────────────────────────────────────────────────────

/// Knobs recorded in the file header at create time.  On restore the header
/// on disk wins — a file keeps the codec and watermark it was born with.
#[derive(Debug, Clone)]
pub struct FileOptions {
    pub compression:          Compression,
    pub block_size_threshold: u32,
    pub encoding:             EncodingFormat,
    pub checksum_enabled:     bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            compression:          Compression::default(),
            block_size_threshold: DEFAULT_BLOCK_SIZE_THRESHOLD,
            encoding:             EncodingFormat::default(),
            checksum_enabled:     true,
        }
    }
}

/// Per-file compression effectiveness summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionStats {
    pub total_uncompressed_bytes: u64,
    pub total_compressed_bytes:   u64,
    pub ratio:                    f64,
    pub effective:                bool,
}

// ── BlockStorageFile ─────────────────────────────────────────────────────────

pub struct BlockStorageFile {
    path:           PathBuf,
    file:           File,
    header:         FileHeader,
    /// Epoch-aligned hour (seconds) this file covers.
    hour_timestamp: i64,
    buffer:         EventBuffer,
    blocks:         Vec<BlockMetadata>,
    final_states:   FinalResourceStates,
    next_block_id:  u32,
    /// Where the next block — or, on Close, the index section — lands.
    write_offset:   u64,
    codec:          Box<dyn Codec>,
    closed:         bool,
}

impl std::fmt::Debug for BlockStorageFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStorageFile")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("hour_timestamp", &self.hour_timestamp)
            .field("blocks", &self.blocks)
            .field("next_block_id", &self.next_block_id)
            .field("write_offset", &self.write_offset)
            .field("closed", &self.closed)
            .finish()
    }
}

impl BlockStorageFile {
    /// Open the file for `hour_timestamp`, creating it or restoring a
    /// cleanly closed one for further appends.
    pub fn open(path: &Path, hour_timestamp: i64, options: FileOptions) -> Result<Self> {
        if path.exists() {
            Self::restore(path, hour_timestamp)
        } else {
            Self::create(path, hour_timestamp, options)
        }
    }

    fn create(path: &Path, hour_timestamp: i64, options: FileOptions) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)?;

        let header = FileHeader::new(
            options.compression,
            options.block_size_threshold,
            options.encoding,
            options.checksum_enabled,
        );
        header.write(&mut file)?;

        info!(path = %path.display(), hour_timestamp, "created block storage file");

        Ok(Self {
            path:   path.to_owned(),
            file,
            buffer: EventBuffer::new(
                u64::from(header.block_size_threshold),
                header.encoding,
            )?,
            codec:  get_codec(header.compression),
            header,
            hour_timestamp,
            blocks:        Vec::new(),
            final_states:  FinalResourceStates::new(),
            next_block_id: 0,
            write_offset:  FILE_HEADER_SIZE as u64,
            closed:        false,
        })
    }

    fn restore(path: &Path, hour_timestamp: i64) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let header = FileHeader::read(&mut file, path)?;

        // A file without a valid footer was not closed cleanly; this version
        // does not attempt forward-scan recovery.
        let footer = match FileFooter::read_from_end(&mut file, path) {
            Ok(f) => f,
            Err(e) if e.is_incomplete() => {
                return Err(StoreError::CorruptFile {
                    path:   path.to_owned(),
                    reason: "no valid footer (file was not closed cleanly)".into(),
                });
            }
            Err(e) => return Err(e),
        };

        let file_size = file.metadata()?.len();
        if !footer_spans_file(&footer, file_size) {
            return Err(StoreError::CorruptFile {
                path:   path.to_owned(),
                reason: "footer does not span the file".into(),
            });
        }

        file.seek(SeekFrom::Start(footer.index_section_offset))?;
        let mut section_bytes = vec![0u8; footer.index_section_length as usize];
        file.read_exact(&mut section_bytes)?;

        if !footer.checksum.is_empty()
            && blake3::hash(&section_bytes).to_hex().to_string() != footer.checksum
        {
            return Err(StoreError::CorruptFile {
                path:   path.to_owned(),
                reason: "index section checksum mismatch".into(),
            });
        }

        let section = IndexSection::from_bytes(&section_bytes).map_err(|e| {
            StoreError::CorruptFile {
                path:   path.to_owned(),
                reason: format!("index section: {e}"),
            }
        })?;

        let next_block_id = section.block_metadata.len() as u32;

        // Appends resume where the old index section started; it gets
        // rewritten (with the footer) on the next Close.
        file.seek(SeekFrom::Start(footer.index_section_offset))?;

        info!(
            path = %path.display(),
            blocks = next_block_id,
            states = section.final_resource_states.len(),
            "restored block storage file"
        );

        Ok(Self {
            path:   path.to_owned(),
            buffer: EventBuffer::new(
                u64::from(header.block_size_threshold),
                header.encoding,
            )?,
            codec:  get_codec(header.compression),
            file,
            header,
            hour_timestamp,
            blocks:        section.block_metadata,
            final_states:  section.final_resource_states,
            next_block_id,
            write_offset:  footer.index_section_offset,
            closed:        false,
        })
    }

    // ── Write path ───────────────────────────────────────────────────────────

    /// Append one event.  Rolls the open block first when the watermark
    /// would be exceeded.  Never drops events: any failure propagates.
    pub fn write_event(&mut self, event: Event) -> Result<()> {
        self.ensure_open()?;

        if self.buffer.is_full(event.payload_size()) {
            self.flush_block()?;
        }

        state::apply_event(&mut self.final_states, &event);
        self.buffer.push(event);
        Ok(())
    }

    /// Finalize the open buffer into a block and append it.
    fn flush_block(&mut self) -> Result<()> {
        let (mut meta, frame) =
            self.buffer.finalize(self.next_block_id, self.header.checksum_enabled)?;

        let compressed = self.codec.compress(&frame)?;
        meta.offset            = self.write_offset;
        meta.compressed_length = compressed.len() as u64;

        self.file.seek(SeekFrom::Start(self.write_offset))?;
        self.file.write_all(&compressed)?;

        debug!(
            path     = %self.path.display(),
            block_id = meta.id,
            events   = meta.event_count,
            raw      = meta.uncompressed_length,
            packed   = meta.compressed_length,
            "flushed block"
        );

        self.write_offset += compressed.len() as u64;
        self.next_block_id += 1;
        self.blocks.push(meta);
        Ok(())
    }

    /// Flush the open buffer (if any), write the index section and footer,
    /// and release the handle.  Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        if !self.buffer.is_empty() {
            self.flush_block()?;
        }

        let section = IndexSection::new(self.blocks.clone(), self.final_states.clone());
        let section_bytes = section.to_bytes()?;

        let checksum = if self.header.checksum_enabled {
            blake3::hash(&section_bytes).to_hex().to_string()
        } else {
            String::new()
        };

        self.file.seek(SeekFrom::Start(self.write_offset))?;
        self.file.write_all(&section_bytes)?;

        let footer = FileFooter::new(
            self.write_offset,
            section_bytes.len() as u32,
            checksum,
        );
        footer.write(&mut self.file)?;

        // A restore-then-close may shrink the tail; trim any stale bytes so
        // the footer invariant (offset + length + 324 == size) holds.
        let end = self.file.stream_position()?;
        self.file.set_len(end)?;
        self.file.sync_all()?;
        self.closed = true;

        info!(
            path   = %self.path.display(),
            blocks = self.blocks.len(),
            events = self.total_events(),
            "closed block storage file"
        );
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "storage file is closed",
            )));
        }
        Ok(())
    }

    // ── In-memory / same-process reads ───────────────────────────────────────

    /// Events buffered in the open block, in insertion order.
    pub fn buffered_events(&self) -> &[Event] {
        self.buffer.events()
    }

    /// Decode the events of one already-flushed block using a fresh
    /// read-only handle, so the append position is untouched.
    pub fn read_block_events(&self, meta: &BlockMetadata) -> Result<Vec<Event>> {
        let mut reader = File::open(&self.path)?;
        reader.seek(SeekFrom::Start(meta.offset))?;
        let mut compressed = vec![0u8; meta.compressed_length as usize];
        reader.read_exact(&mut compressed)?;

        let frame = self.codec.decompress(&compressed)?;
        if !meta.checksum.is_empty()
            && blake3::hash(&frame).to_hex().to_string() != meta.checksum
        {
            return Err(StoreError::ChecksumMismatch {
                path:     self.path.clone(),
                block_id: meta.id,
            });
        }
        decode_frame(&frame, self.header.encoding)
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn hour_timestamp(&self) -> i64 {
        self.hour_timestamp
    }

    pub fn blocks(&self) -> &[BlockMetadata] {
        &self.blocks
    }

    pub fn next_block_id(&self) -> u32 {
        self.next_block_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Events in finalized blocks plus the open buffer.
    pub fn total_events(&self) -> u64 {
        self.blocks.iter().map(|b| b.event_count).sum::<u64>() + self.buffer.len() as u64
    }

    pub fn inverted_index(&self) -> InvertedIndex {
        InvertedIndex::from_blocks(&self.blocks)
    }

    pub fn statistics(&self) -> FileStatistics {
        FileStatistics::from_blocks(&self.blocks)
    }

    pub fn compression_stats(&self) -> CompressionStats {
        let stats = self.statistics();
        CompressionStats {
            total_uncompressed_bytes: stats.total_uncompressed_bytes,
            total_compressed_bytes:   stats.total_compressed_bytes,
            ratio:                    stats.compression_ratio,
            effective: codec::is_effective(
                stats.total_uncompressed_bytes as usize,
                stats.total_compressed_bytes as usize,
            ),
        }
    }

    /// `(timestamp_min, block_id)` per block — a sparse index over time.
    pub fn sparse_timestamp_index(&self) -> Vec<(i64, u32)> {
        self.blocks.iter().map(|b| (b.timestamp_min, b.id)).collect()
    }

    pub fn final_resource_states(&self) -> &FinalResourceStates {
        &self.final_states
    }

    /// Carry forward states from a predecessor file (hour roll).
    pub fn import_final_states(&mut self, states: &FinalResourceStates) {
        state::import_states(&mut self.final_states, states);
    }

    /// Garbage-collect DELETEd resources older than `retention_days`.
    pub fn cleanup_old_state_snapshots(&mut self, retention_days: u64) -> usize {
        let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        state::cleanup_old_snapshots(&mut self.final_states, retention_days, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::sample_event;

    fn small_options() -> FileOptions {
        FileOptions {
            block_size_threshold: 64,
            ..Default::default()
        }
    }

    #[test]
    fn write_rolls_blocks_on_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024-03-01-10.bin");

        let mut f = BlockStorageFile::open(&path, 1_709_287_200, small_options()).unwrap();
        for i in 0..10 {
            f.write_event(sample_event(&format!("e{i}"), "Pod", "default", i + 1))
                .unwrap();
        }
        assert!(f.next_block_id() > 0, "watermark must have rolled blocks");
        assert_eq!(f.total_events(), 10);
        f.close().unwrap();
        f.close().unwrap(); // idempotent
    }

    #[test]
    fn restore_rejects_footerless_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024-03-01-11.bin");

        // A valid header followed by a torn block and no footer.
        let mut bytes = Vec::new();
        FileHeader::new(
            Compression::Zstd,
            1024,
            EncodingFormat::Protobuf,
            false,
        )
        .write(&mut bytes)
        .unwrap();
        bytes.extend_from_slice(&[0xAB; 40]);
        std::fs::write(&path, &bytes).unwrap();

        let err = BlockStorageFile::open(&path, 0, FileOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::CorruptFile { .. }));
    }

    #[test]
    fn close_then_reopen_preserves_blocks_and_states() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024-03-01-12.bin");

        {
            let mut f =
                BlockStorageFile::open(&path, 1_709_294_400, FileOptions::default()).unwrap();
            for i in 0..5 {
                f.write_event(sample_event(&format!("e{i}"), "Pod", "ns", i + 1))
                    .unwrap();
            }
            f.close().unwrap();
        }

        let f = BlockStorageFile::open(&path, 1_709_294_400, FileOptions::default()).unwrap();
        assert_eq!(f.total_events(), 5);
        assert_eq!(f.next_block_id(), f.blocks().len() as u32);
        assert_eq!(f.final_resource_states().len(), 5);
    }
}
