//! Fixed-size file records — header at offset 0, footer at EOF−324.
//!
//! # FileHeader layout (77 bytes, numeric fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      8   magic                 = "RPKBLOCK" (ASCII, not LE)
//!    8      8   format_version        ASCII, null-padded, e.g. "1.0"
//!   16      8   created_at            unix nanos (LE i64)
//!   24     16   compression           ASCII, null-padded ("gzip", "zstd")
//!   40      4   block_size_threshold  uncompressed-byte watermark (LE u32)
//!   44     16   encoding              ASCII, null-padded ("protobuf", "json")
//!   60      1   checksum_enabled      0/1
//!   61     16   reserved              preserved verbatim, never asserted zero
//! ```
//!
//! # FileFooter layout (324 bytes)
//!
//! ```text
//! Offset  Size  Field
//!    0      8   index_section_offset  absolute byte offset (LE u64)
//!    8      4   index_section_length  byte length (LE u32)
//!   12    256   checksum              ASCII hex, null-padded; empty if disabled
//!  268     48   reserved              preserved verbatim
//!  316      8   magic                 = "RPKEND" null-padded to 8
//! ```
//!
//! Readers seek to `file_size - 324`, parse the footer, verify its magic,
//! then seek to `index_section_offset` for the index section.  A footer whose
//! magic does not match means the file is still being written; callers skip
//! it silently.
//!
//! # Compatibility
//! Any `1.x` format version is accepted on read.  Reserved bytes are read
//! and carried through rewrites unchanged.  Writers only ever emit
//! [`FORMAT_VERSION`].

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use std::path::Path;

use crate::codec::Compression;
use crate::error::{Result, StoreError};
use crate::event::EncodingFormat;

pub const HEADER_MAGIC:     &[u8; 8] = b"RPKBLOCK";
pub const FOOTER_MAGIC:     &str     = "RPKEND";
pub const FORMAT_VERSION:   &str     = "1.0";
pub const FILE_HEADER_SIZE: usize    = 77;
pub const FILE_FOOTER_SIZE: usize    = 324;

/// Default uncompressed-byte watermark per block: 256 KiB.
pub const DEFAULT_BLOCK_SIZE_THRESHOLD: u32 = 256 * 1024;

// ── FileHeader ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub format_version:       String,
    pub created_at:           i64,
    pub compression:          Compression,
    pub block_size_threshold: u32,
    pub encoding:             EncodingFormat,
    pub checksum_enabled:     bool,
    /// Carried verbatim across rewrites; a 1.x reader never interprets it.
    pub reserved:             [u8; 16],
}

impl FileHeader {
    pub fn new(
        compression:          Compression,
        block_size_threshold: u32,
        encoding:             EncodingFormat,
        checksum_enabled:     bool,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_owned(),
            created_at: chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
            compression,
            block_size_threshold,
            encoding,
            checksum_enabled,
            reserved: [0u8; 16],
        }
    }

    /// Write exactly [`FILE_HEADER_SIZE`] bytes.
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(FILE_HEADER_SIZE);
        buf.extend_from_slice(HEADER_MAGIC);                                   // 8
        buf.extend_from_slice(&ascii_field::<8>(&self.format_version));        // 8
        buf.write_i64::<LittleEndian>(self.created_at)?;                       // 8
        buf.extend_from_slice(&ascii_field::<16>(self.compression.name()));    // 16
        buf.write_u32::<LittleEndian>(self.block_size_threshold)?;             // 4
        buf.extend_from_slice(&ascii_field::<16>(self.encoding.name()));       // 16
        buf.push(self.checksum_enabled as u8);                                 // 1
        buf.extend_from_slice(&self.reserved);                                 // 16

        debug_assert_eq!(buf.len(), FILE_HEADER_SIZE);
        w.write_all(&buf)
    }

    /// Read and validate a header.  `path` is carried into errors only.
    pub fn read<R: Read>(mut r: R, path: &Path) -> Result<Self> {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        r.read_exact(&mut buf)?;

        if &buf[0..8] != HEADER_MAGIC {
            return Err(StoreError::InvalidFormat {
                path:   path.to_owned(),
                reason: "header magic mismatch".into(),
            });
        }

        let format_version = parse_ascii(&buf[8..16], path, "format_version")?;
        if !format_version.starts_with("1.") {
            return Err(StoreError::InvalidFormat {
                path:   path.to_owned(),
                reason: format!("unsupported format version {format_version}"),
            });
        }

        let created_at = (&buf[16..24]).read_i64::<LittleEndian>()?;

        let compression_name = parse_ascii(&buf[24..40], path, "compression")?;
        let compression = Compression::from_name(&compression_name).ok_or_else(|| {
            StoreError::InvalidFormat {
                path:   path.to_owned(),
                reason: format!("unknown compression algorithm {compression_name:?}"),
            }
        })?;

        let block_size_threshold = (&buf[40..44]).read_u32::<LittleEndian>()?;

        let encoding_name = parse_ascii(&buf[44..60], path, "encoding")?;
        let encoding = EncodingFormat::from_name(&encoding_name).ok_or_else(|| {
            StoreError::InvalidFormat {
                path:   path.to_owned(),
                reason: format!("unknown encoding format {encoding_name:?}"),
            }
        })?;

        let checksum_enabled = buf[60] != 0;
        let reserved: [u8; 16] = buf[61..77].try_into().expect("fixed slice");

        Ok(Self {
            format_version,
            created_at,
            compression,
            block_size_threshold,
            encoding,
            checksum_enabled,
            reserved,
        })
    }
}

// ── FileFooter ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFooter {
    pub index_section_offset: u64,
    pub index_section_length: u32,
    /// Hex checksum of the serialized index section; empty when disabled.
    pub checksum:             String,
    pub reserved:             [u8; 48],
}

impl FileFooter {
    pub fn new(index_section_offset: u64, index_section_length: u32, checksum: String) -> Self {
        Self {
            index_section_offset,
            index_section_length,
            checksum,
            reserved: [0u8; 48],
        }
    }

    /// Write exactly [`FILE_FOOTER_SIZE`] bytes.
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(FILE_FOOTER_SIZE);
        buf.write_u64::<LittleEndian>(self.index_section_offset)?;  // 8
        buf.write_u32::<LittleEndian>(self.index_section_length)?;  // 4
        buf.extend_from_slice(&ascii_field::<256>(&self.checksum)); // 256
        buf.extend_from_slice(&self.reserved);                      // 48
        buf.extend_from_slice(&ascii_field::<8>(FOOTER_MAGIC));     // 8

        debug_assert_eq!(buf.len(), FILE_FOOTER_SIZE);
        w.write_all(&buf)
    }

    /// Parse a footer from a 324-byte buffer.
    ///
    /// A magic mismatch yields [`StoreError::IncompleteFile`] — the caller
    /// treats the file as mid-write and skips it, rather than as corruption.
    pub fn parse(buf: &[u8; FILE_FOOTER_SIZE], path: &Path) -> Result<Self> {
        // Raw byte compare: the tail of a mid-write file is arbitrary bytes,
        // so the magic must be checked before any field is interpreted.
        if buf[316..324] != ascii_field::<8>(FOOTER_MAGIC) {
            return Err(StoreError::IncompleteFile { path: path.to_owned() });
        }

        let index_section_offset = (&buf[0..8]).read_u64::<LittleEndian>()?;
        let index_section_length = (&buf[8..12]).read_u32::<LittleEndian>()?;
        let checksum             = parse_ascii(&buf[12..268], path, "checksum")?;
        let reserved: [u8; 48]   = buf[268..316].try_into().expect("fixed slice");

        Ok(Self {
            index_section_offset,
            index_section_length,
            checksum,
            reserved,
        })
    }

    /// Read the footer from the tail of `r`, which must support seeking.
    ///
    /// Files shorter than [`FILE_FOOTER_SIZE`] are reported as incomplete.
    pub fn read_from_end<R: Read + io::Seek>(r: &mut R, path: &Path) -> Result<Self> {
        let size = r.seek(io::SeekFrom::End(0))?;
        if size < FILE_FOOTER_SIZE as u64 {
            return Err(StoreError::IncompleteFile { path: path.to_owned() });
        }
        r.seek(io::SeekFrom::Start(size - FILE_FOOTER_SIZE as u64))?;
        let mut buf = [0u8; FILE_FOOTER_SIZE];
        r.read_exact(&mut buf)?;
        Self::parse(&buf, path)
    }
}

// ── ASCII field helpers ──────────────────────────────────────────────────────

/// Null-pad `s` to exactly `N` bytes.  Overlong values are truncated; every
/// value written by this crate fits by construction.
fn ascii_field<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let bytes = s.as_bytes();
    let n = bytes.len().min(N);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// Parse a null-padded ASCII field, trimming trailing NULs.
fn parse_ascii(buf: &[u8], path: &Path, field: &str) -> Result<String> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..end])
        .map(str::to_owned)
        .map_err(|_| StoreError::InvalidFormat {
            path:   path.to_owned(),
            reason: format!("{field} is not valid ASCII"),
        })
}

/// Footer invariant check: `offset + length + 324 == file_size`.
pub fn footer_spans_file(footer: &FileFooter, file_size: u64) -> bool {
    footer.index_section_offset
        + u64::from(footer.index_section_length)
        + FILE_FOOTER_SIZE as u64
        == file_size
}
