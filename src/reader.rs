//! Read-only access to one block storage file.
//!
//! A reader is single-owner and seeks freely; open as many readers on the
//! same file as needed (shared read access at the OS level).  The read path
//! is footer-driven: seek to EOF−324, parse the footer, then load the index
//! section it points at.  Block payloads are only touched after the index
//! has narrowed them down.
//!
//! Integrity order mirrors the write path: decompress first, then compare
//! the blake3 of the decompressed frame against the stored block checksum.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::codec::{get_codec, Codec};
use crate::error::{Result, StoreError};
use crate::event::{decode_frame, Event};
use crate::format::{footer_spans_file, FileFooter, FileHeader};
use crate::index::{BlockMetadata, IndexSection};

pub struct BlockReader {
    path:   PathBuf,
    file:   File,
    header: FileHeader,
    codec:  Box<dyn Codec>,
}

impl BlockReader {
    /// Open read-only.  The header is parsed eagerly — it exists from the
    /// moment a file is created, so this succeeds even on mid-write files;
    /// whether the file is *complete* is the footer's business.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let header = FileHeader::read(&mut file, path)?;
        Ok(Self {
            path:  path.to_owned(),
            codec: get_codec(header.compression),
            file,
            header,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read and validate the header at offset 0.
    pub fn read_file_header(&mut self) -> Result<FileHeader> {
        self.file.seek(SeekFrom::Start(0))?;
        FileHeader::read(&mut self.file, &self.path)
    }

    /// Parse the footer at EOF−324.  `IncompleteFile` when the file is too
    /// short or the magic does not match — the file is still being written.
    pub fn read_file_footer(&mut self) -> Result<FileFooter> {
        FileFooter::read_from_end(&mut self.file, &self.path)
    }

    /// Read and decode the index section at the given location.
    pub fn read_index_section(&mut self, offset: u64, length: u32) -> Result<IndexSection> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut bytes = vec![0u8; length as usize];
        self.file.read_exact(&mut bytes)?;
        IndexSection::from_bytes(&bytes).map_err(|e| StoreError::CorruptFile {
            path:   self.path.clone(),
            reason: format!("index section: {e}"),
        })
    }

    /// Footer → span check → checksum check → index section, in one step.
    pub fn read_index(&mut self) -> Result<(FileFooter, IndexSection)> {
        let footer = self.read_file_footer()?;

        let size = self.file.metadata()?.len();
        if !footer_spans_file(&footer, size) {
            return Err(StoreError::CorruptFile {
                path:   self.path.clone(),
                reason: "footer does not span the file".into(),
            });
        }

        self.file.seek(SeekFrom::Start(footer.index_section_offset))?;
        let mut bytes = vec![0u8; footer.index_section_length as usize];
        self.file.read_exact(&mut bytes)?;

        if !footer.checksum.is_empty()
            && blake3::hash(&bytes).to_hex().to_string() != footer.checksum
        {
            return Err(StoreError::CorruptFile {
                path:   self.path.clone(),
                reason: "index section checksum mismatch".into(),
            });
        }

        let section = IndexSection::from_bytes(&bytes).map_err(|e| StoreError::CorruptFile {
            path:   self.path.clone(),
            reason: format!("index section: {e}"),
        })?;
        Ok((footer, section))
    }

    /// Read and decompress one block, returning the raw frame.
    pub fn read_block(&mut self, meta: &BlockMetadata) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(meta.offset))?;
        let mut compressed = vec![0u8; meta.compressed_length as usize];
        self.file.read_exact(&mut compressed)?;

        let frame = self.codec.decompress(&compressed)?;
        if !meta.checksum.is_empty()
            && blake3::hash(&frame).to_hex().to_string() != meta.checksum
        {
            return Err(StoreError::ChecksumMismatch {
                path:     self.path.clone(),
                block_id: meta.id,
            });
        }
        Ok(frame)
    }

    /// Decode every event of one block, in stored order.
    pub fn read_block_events(&mut self, meta: &BlockMetadata) -> Result<Vec<Event>> {
        let frame = self.read_block(meta)?;
        decode_frame(&frame, self.header.encoding)
    }
}
