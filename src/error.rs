//! Error taxonomy shared across the crate.
//!
//! Every fallible operation returns [`StoreError`].  The variants map 1:1 to
//! the failure classes a caller can meaningfully react to:
//!
//! | Variant | Meaning | Recoverable? |
//! |---------|---------|--------------|
//! | `InvalidFormat` | magic/version mismatch in header or footer | no (for that file) |
//! | `CorruptFile` | footer absent or index section un-decodable | no (file is skipped) |
//! | `IncompleteFile` | EOF before the footer — file still being written | yes (retry later) |
//! | `ChecksumMismatch` | block content does not match its stored checksum | no |
//! | `EmptyBuffer` | finalize called with zero buffered events | caller bug |
//! | `InvalidQuery` | request validation failure (e.g. end < start) | caller bug |
//! | `Cancelled` | operation aborted by a cancellation token or deadline | yes |
//! | `Io` | unwrapped OS error | depends |
//!
//! The writer never silently drops events: any failure in the write path
//! propagates so the producer can decide.  The query path aggregates per-file
//! failures instead of failing the whole query; see `query.rs`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Magic bytes or format version mismatch in a header or footer.
    #[error("invalid format in {path}: {reason}")]
    InvalidFormat { path: PathBuf, reason: String },

    /// Footer absent or the index section cannot be decoded, in a file that
    /// is not currently being written by this process.
    #[error("corrupt file {path}: {reason}")]
    CorruptFile { path: PathBuf, reason: String },

    /// EOF before the expected footer — the file is still being written.
    #[error("incomplete file {path}")]
    IncompleteFile { path: PathBuf },

    /// A block's recomputed checksum differs from the stored one.
    #[error("checksum mismatch in {path}, block {block_id}")]
    ChecksumMismatch { path: PathBuf, block_id: u32 },

    /// `finalize` called on a buffer with zero events.
    #[error("cannot finalize an empty event buffer")]
    EmptyBuffer,

    /// Request validation failure.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Operation aborted by cancellation or deadline.
    #[error("operation cancelled")]
    Cancelled,

    /// Compression or decompression failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// Event encode/decode failure (protobuf or legacy JSON).
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// True when the error means "file is mid-write, try again later" —
    /// the query path skips such files without surfacing an error.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, StoreError::IncompleteFile { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
