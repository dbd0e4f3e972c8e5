//! # rpkstore — time-partitioned, block-compressed event store
//!
//! Persists a continuous stream of Kubernetes-style resource change events
//! into hourly `YYYY-MM-DD-HH.bin` files and answers time-range queries with
//! optional kind/namespace/group filters.
//!
//! Format guarantees (frozen in 1.x):
//! - All numeric fields are little-endian; never negotiated
//! - Every file starts with a 77-byte header (`RPKBLOCK`) and, once closed,
//!   ends with a 324-byte footer (`RPKEND`) pointing at the index section —
//!   files are readable backwards from EOF
//! - Blocks are compressed frames of varint-length-prefixed protobuf event
//!   records; block ids are dense, monotone, and file-local
//! - The index section is a self-describing JSON document: block metadata,
//!   inverted indexes, statistics, and the final-resource-states table
//! - A cleanly closed file can be reopened and appended to; the rewritten
//!   file is indistinguishable from a single-session write
//! - Files without a valid footer are rejected (`CorruptFile`) by the writer
//!   and silently skipped as mid-write by the query path
//! - Reserved header/footer bytes are preserved, never asserted zero; any
//!   `1.x` version is readable
//!
//! The consistent-view layer carries each resource's last known state across
//! hour boundaries, so a query window still reports resources that existed
//! before it — as synthetic `state-` events anchored at the window start —
//! unless their last state is a DELETE.

pub mod bloom;
pub mod buffer;
pub mod codec;
pub mod error;
pub mod event;
pub mod format;
pub mod index;
pub mod query;
pub mod reader;
pub mod state;
pub mod storage;
pub mod writer;

// Flat re-exports for the most common types.
pub use codec::{get_codec, Codec, Compression};
pub use error::{Result, StoreError};
pub use event::{EncodingFormat, Event, EventType, ResourceMeta};
pub use format::{FileFooter, FileHeader, FILE_FOOTER_SIZE, FILE_HEADER_SIZE};
pub use index::{
    BlockMetadata, FileStatistics, FinalResourceStates, IndexSection, InvertedIndex,
    ResourceState,
};
pub use query::{CancelToken, QueryExecutor, QueryFilters, QueryRequest, QueryResult};
pub use reader::BlockReader;
pub use storage::{Storage, StorageConfig};
pub use writer::{BlockStorageFile, CompressionStats, FileOptions};
