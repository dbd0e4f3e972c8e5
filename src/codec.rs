//! Compression adapters — gzip and zstd behind one trait.
//!
//! The algorithm in use is recorded by name in the file header (an ASCII
//! field, see `format.rs`); readers dispatch on that name and MUST fail hard
//! on an unknown one — there is no negotiation and no fallback.
//!
//! Both adapters satisfy two laws relied on throughout the crate:
//!   - `decompress(compress(x)) == x` for any byte string
//!   - empty input yields empty output in both directions
//!
//! Streaming variants are provided for payloads that should not be buffered
//! whole; the block write path uses the one-shot calls because a block is
//! bounded by the configured size threshold anyway.

use std::io::{self, Read, Write};

use crate::error::{Result, StoreError};

/// Default zstd compression level.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// A compression ratio below this is considered effective.
pub const EFFECTIVE_RATIO: f64 = 0.9;

// ── Compression identifier ───────────────────────────────────────────────────

/// Algorithm discriminant.  The `name()` string is what lands in the file
/// header; it is parsed back by `from_name` on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zstd,
}

impl Compression {
    pub fn name(self) -> &'static str {
        match self {
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gzip" => Some(Compression::Gzip),
            "zstd" => Some(Compression::Zstd),
            _      => None,
        }
    }
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Zstd
    }
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn compression(&self) -> Compression;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
    /// Copy `r` into `w`, compressing.  Returns bytes written.
    fn compress_stream(&self, r: &mut dyn Read, w: &mut dyn Write) -> Result<u64>;
    /// Copy `r` into `w`, decompressing.  Returns bytes written.
    fn decompress_stream(&self, r: &mut dyn Read, w: &mut dyn Write) -> Result<u64>;
}

/// Resolve a [`Compression`] to its codec implementation.
pub fn get_codec(c: Compression) -> Box<dyn Codec> {
    match c {
        Compression::Gzip => Box::new(GzipCodec),
        Compression::Zstd => Box::new(ZstdCodec),
    }
}

// ── Gzip ─────────────────────────────────────────────────────────────────────

pub struct GzipCodec;

impl Codec for GzipCodec {
    fn compression(&self) -> Compression {
        Compression::Gzip
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).map_err(codec_err)?;
        enc.finish().map_err(codec_err)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(codec_err)?;
        Ok(out)
    }

    fn compress_stream(&self, r: &mut dyn Read, w: &mut dyn Write) -> Result<u64> {
        let mut counted = CountingWriter::new(w);
        let mut enc = flate2::write::GzEncoder::new(&mut counted, flate2::Compression::default());
        io::copy(r, &mut enc).map_err(codec_err)?;
        enc.finish().map_err(codec_err)?;
        Ok(counted.written)
    }

    fn decompress_stream(&self, r: &mut dyn Read, w: &mut dyn Write) -> Result<u64> {
        let mut dec = flate2::read::GzDecoder::new(r);
        io::copy(&mut dec, w).map_err(codec_err)
    }
}

// ── Zstd ─────────────────────────────────────────────────────────────────────

pub struct ZstdCodec;

impl Codec for ZstdCodec {
    fn compression(&self) -> Compression {
        Compression::Zstd
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        zstd::encode_all(data, DEFAULT_ZSTD_LEVEL).map_err(codec_err)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        zstd::decode_all(data).map_err(codec_err)
    }

    fn compress_stream(&self, r: &mut dyn Read, w: &mut dyn Write) -> Result<u64> {
        let mut counted = CountingWriter::new(w);
        zstd::stream::copy_encode(r, &mut counted, DEFAULT_ZSTD_LEVEL).map_err(codec_err)?;
        Ok(counted.written)
    }

    fn decompress_stream(&self, r: &mut dyn Read, w: &mut dyn Write) -> Result<u64> {
        let mut counted = CountingWriter::new(w);
        zstd::stream::copy_decode(r, &mut counted).map_err(codec_err)?;
        Ok(counted.written)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn codec_err(e: io::Error) -> StoreError {
    StoreError::Codec(e.to_string())
}

/// `len_out / len_in`; 1.0 for empty input.
pub fn compression_ratio(len_in: usize, len_out: usize) -> f64 {
    if len_in == 0 {
        return 1.0;
    }
    len_out as f64 / len_in as f64
}

/// True when compression actually paid off for this input.
pub fn is_effective(len_in: usize, len_out: usize) -> bool {
    len_in > 0 && compression_ratio(len_in, len_out) < EFFECTIVE_RATIO
}

struct CountingWriter<W> {
    inner:   W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
