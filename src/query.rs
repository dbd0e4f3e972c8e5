//! Filtered time-range queries across hourly files.
//!
//! Execution order per file: filename-hour overlap → footer (a bad magic
//! means "still being written", skipped without error) → index section →
//! inverted-index candidate pruning → per-block time pruning → decompress,
//! decode, filter.  After all files the events are sorted, the
//! consistent-view step injects `state-` events for pre-existing resources,
//! and the optional limit is applied.
//!
//! Failure policy: an I/O error on one file logs a warning and skips it; a
//! corrupt index section in an otherwise well-footered file is reported in
//! the result's failure list with the file path.  Neither fails the query.
//! Cancellation is checked between files and between blocks; a cancelled
//! query returns [`StoreError::Cancelled`] and discards partial results.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::event::{Event, ResourceMeta};
use crate::index::FinalResourceStates;
use crate::reader::BlockReader;
use crate::state;
use crate::storage::{hour_from_filename, list_storage_files};

const NANOS_PER_SECOND: i64 = 1_000_000_000;
const SECONDS_PER_HOUR: i64 = 3600;

// ── Request / filters ────────────────────────────────────────────────────────

/// Equality filters over the three indexed categorical attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilters {
    pub kind:      Option<String>,
    pub namespace: Option<String>,
    pub group:     Option<String>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.namespace.is_none() && self.group.is_none()
    }

    /// AND semantics across the filters that are present.
    pub fn matches(&self, resource: &ResourceMeta) -> bool {
        self.kind.as_ref().map_or(true, |k| *k == resource.kind)
            && self.namespace.as_ref().map_or(true, |n| *n == resource.namespace)
            && self.group.as_ref().map_or(true, |g| *g == resource.group)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    /// Window start, unix seconds (inclusive).
    pub start_ts: i64,
    /// Window end, unix seconds (inclusive).
    pub end_ts:   i64,
    pub filters:  QueryFilters,
    pub limit:    Option<usize>,
}

impl QueryRequest {
    pub fn validate(&self) -> Result<()> {
        if self.end_ts < self.start_ts {
            return Err(StoreError::InvalidQuery(format!(
                "end {} precedes start {}",
                self.end_ts, self.start_ts
            )));
        }
        Ok(())
    }

    pub fn start_nanos(&self) -> i64 {
        self.start_ts * NANOS_PER_SECOND
    }

    pub fn end_nanos(&self) -> i64 {
        self.end_ts * NANOS_PER_SECOND
    }
}

// ── Result ───────────────────────────────────────────────────────────────────

/// A file the query could not use, with the reason.  Incomplete (mid-write)
/// files are not failures and never appear here.
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub path:  PathBuf,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct QueryResult {
    pub events:            Vec<Event>,
    pub count:             usize,
    pub segments_scanned:  u64,
    pub segments_skipped:  u64,
    pub files_searched:    u64,
    pub execution_time_ms: u64,
    pub failures:          Vec<FileFailure>,
}

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Cooperative cancellation flag, checked at block and file granularity.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(())
    }
}

// ── Executor ─────────────────────────────────────────────────────────────────

pub struct QueryExecutor {
    data_dir: PathBuf,
}

impl QueryExecutor {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self { data_dir: data_dir.into() }
    }

    pub fn execute(&self, req: &QueryRequest) -> Result<QueryResult> {
        self.execute_with_cancel(req, &CancelToken::new())
    }

    pub fn execute_with_cancel(
        &self,
        req:    &QueryRequest,
        cancel: &CancelToken,
    ) -> Result<QueryResult> {
        req.validate()?;
        let started = Instant::now();

        let (start, end) = (req.start_nanos(), req.end_nanos());
        let mut result = QueryResult::default();
        let mut merged_states = FinalResourceStates::new();

        for path in self.overlapping_files(req)? {
            cancel.check()?;
            result.files_searched += 1;

            // scan_file folds per-file trouble into `result`; the only
            // error it propagates is cancellation.
            if let Some(states) = self.scan_file(&path, req, start, end, cancel, &mut result)? {
                state::import_states(&mut merged_states, &states);
            }
        }

        result.events.sort_by_key(|e| e.timestamp);

        // Consistent view: resources whose last known state precedes the
        // window still appear, anchored at the window start.
        let present_keys: BTreeSet<String> =
            result.events.iter().map(Event::resource_key).collect();
        let injected =
            state::synthesize_state_events(&merged_states, start, &req.filters, &present_keys);
        if !injected.is_empty() {
            result.events.extend(injected);
            result.events.sort_by_key(|e| e.timestamp);
        }

        if let Some(limit) = req.limit {
            result.events.truncate(limit);
        }

        result.count = result.events.len();
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Files whose filename hour overlaps the query window.
    fn overlapping_files(&self, req: &QueryRequest) -> Result<Vec<PathBuf>> {
        let files = list_storage_files(&self.data_dir)?;
        Ok(files
            .into_iter()
            .filter(|path| {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    return false;
                };
                let Some(hour) = hour_from_filename(name) else {
                    return false;
                };
                hour <= req.end_ts && hour + SECONDS_PER_HOUR > req.start_ts
            })
            .collect())
    }

    /// Scan one file into `result`.
    ///
    /// Returns the file's final-resource-states table when it was readable,
    /// `None` when the file was skipped (mid-write or I/O trouble).  Corrupt
    /// index sections are recorded in `result.failures`.
    fn scan_file(
        &self,
        path:   &Path,
        req:    &QueryRequest,
        start:  i64,
        end:    i64,
        cancel: &CancelToken,
        result: &mut QueryResult,
    ) -> Result<Option<FinalResourceStates>> {
        let mut reader = match BlockReader::open(path) {
            Ok(r) => r,
            Err(StoreError::Io(e)) => {
                warn!(path = %path.display(), error = %e, "cannot open file; skipping");
                return Ok(None);
            }
            Err(e) => {
                result.failures.push(FileFailure {
                    path:  path.to_owned(),
                    error: e.to_string(),
                });
                return Ok(None);
            }
        };

        let (_, section) = match reader.read_index() {
            Ok(pair) => pair,
            Err(e) if e.is_incomplete() => {
                debug!(path = %path.display(), "file has no footer yet; still being written");
                return Ok(None);
            }
            Err(StoreError::Io(e)) => {
                warn!(path = %path.display(), error = %e, "cannot read index; skipping");
                return Ok(None);
            }
            Err(e) => {
                result.failures.push(FileFailure {
                    path:  path.to_owned(),
                    error: e.to_string(),
                });
                return Ok(None);
            }
        };

        let candidates = section.inverted_indexes.candidate_blocks(&req.filters);
        let candidate_set: Option<BTreeSet<u32>> =
            candidates.map(|ids| ids.into_iter().collect());

        for meta in &section.block_metadata {
            cancel.check()?;

            if let Some(ids) = &candidate_set {
                if !ids.contains(&meta.id) {
                    result.segments_skipped += 1;
                    continue;
                }
            }
            if !meta.overlaps(start, end) {
                result.segments_skipped += 1;
                continue;
            }

            let events = match reader.read_block_events(meta) {
                Ok(evs) => evs,
                Err(e) => {
                    result.failures.push(FileFailure {
                        path:  path.to_owned(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            result.segments_scanned += 1;

            for ev in events {
                if ev.timestamp >= start
                    && ev.timestamp <= end
                    && req.filters.matches(&ev.resource)
                {
                    result.events.push(ev);
                }
            }
        }

        Ok(Some(section.final_resource_states))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_window() {
        let req = QueryRequest {
            start_ts: 100,
            end_ts:   50,
            ..Default::default()
        };
        assert!(matches!(
            req.validate(),
            Err(StoreError::InvalidQuery(_))
        ));
    }

    #[test]
    fn filters_match_with_and_semantics() {
        let resource = ResourceMeta {
            group:     "apps".into(),
            kind:      "Pod".into(),
            namespace: "default".into(),
            ..Default::default()
        };
        let mut filters = QueryFilters {
            kind: Some("Pod".into()),
            ..Default::default()
        };
        assert!(filters.matches(&resource));

        filters.namespace = Some("kube-system".into());
        assert!(!filters.matches(&resource));

        assert!(QueryFilters::default().matches(&resource));
    }

    #[test]
    fn cancel_token_trips() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(StoreError::Cancelled)));
    }
}
