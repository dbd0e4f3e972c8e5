//! Hourly file lifecycle — rolling, retention, and low-latency reads into
//! the current hour.
//!
//! One [`Storage`] owns a data directory and at most one open
//! [`BlockStorageFile`] at a time.  The hour bucket is derived from the wall
//! clock at write time (not the event timestamp): rolling from hour H to
//! H+1 closes file H — persisting its footer and state table — before
//! opening H+1 and importing the carried-forward states.
//!
//! All state sits behind one `Arc<RwLock<_>>`; writers take the exclusive
//! lock for the duration of one append (including block finalization when
//! the watermark trips), readers of in-memory state take the shared lock.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, RwLock};
use std::thread;
use std::time::{Duration, SystemTime};

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::codec::Compression;
use crate::error::{Result, StoreError};
use crate::event::{EncodingFormat, Event};
use crate::format::DEFAULT_BLOCK_SIZE_THRESHOLD;
use crate::index::FinalResourceStates;
use crate::query::QueryRequest;
use crate::writer::{BlockStorageFile, FileOptions};

/// On-disk extension of hourly files.
pub const FILE_EXTENSION: &str = "bin";

const SECONDS_PER_HOUR: i64 = 3600;

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding hourly `*.bin` files.
    pub data_dir:             PathBuf,
    /// Uncompressed-byte watermark per block.
    pub block_size_threshold: u32,
    pub compression:          Compression,
    pub encoding:             EncodingFormat,
    pub checksum_enabled:     bool,
    /// Age limit for [`Storage::delete_old_files`].
    pub retention_hours:      u64,
    /// Age limit for [`Storage::cleanup_old_state_snapshots`].
    pub state_retention_days: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir:             PathBuf::from("./data"),
            block_size_threshold: DEFAULT_BLOCK_SIZE_THRESHOLD,
            compression:          Compression::default(),
            encoding:             EncodingFormat::default(),
            checksum_enabled:     true,
            retention_hours:      168,
            state_retention_days: 14,
        }
    }
}

impl StorageConfig {
    fn file_options(&self) -> FileOptions {
        FileOptions {
            compression:          self.compression,
            block_size_threshold: self.block_size_threshold,
            encoding:             self.encoding,
            checksum_enabled:     self.checksum_enabled,
        }
    }
}

// ── Hour bucketing and file naming ───────────────────────────────────────────

/// Truncate a unix timestamp (seconds) to its hour bucket.
pub fn hour_bucket(ts_secs: i64) -> i64 {
    ts_secs - ts_secs.rem_euclid(SECONDS_PER_HOUR)
}

/// `YYYY-MM-DD-HH.bin` for an epoch-aligned hour timestamp (UTC).
pub fn filename_for_hour(hour_ts: i64) -> String {
    match chrono::DateTime::from_timestamp(hour_ts, 0) {
        Some(dt) => format!("{}.{FILE_EXTENSION}", dt.format("%Y-%m-%d-%H")),
        None     => format!("invalid-{hour_ts}.{FILE_EXTENSION}"),
    }
}

/// Parse the hour timestamp back out of a `YYYY-MM-DD-HH.bin` file name.
pub fn hour_from_filename(name: &str) -> Option<i64> {
    let stem = name.strip_suffix(&format!(".{FILE_EXTENSION}"))?;
    if stem.len() != 13 || stem.as_bytes()[10] != b'-' {
        return None;
    }
    let date = NaiveDate::parse_from_str(&stem[..10], "%Y-%m-%d").ok()?;
    let hour: u32 = stem[11..13].parse().ok()?;
    Some(date.and_hms_opt(hour, 0, 0)?.and_utc().timestamp())
}

// ── Storage ──────────────────────────────────────────────────────────────────

struct StorageInner {
    config:  StorageConfig,
    current: Option<BlockStorageFile>,
}

impl StorageInner {
    /// Open or roll to the file for `hour`, carrying states forward.
    fn file_for(&mut self, hour: i64) -> Result<&mut BlockStorageFile> {
        let needs_roll = match &self.current {
            Some(f) => f.hour_timestamp() != hour,
            None    => true,
        };

        if needs_roll {
            let mut carried: Option<FinalResourceStates> = None;
            if let Some(mut old) = self.current.take() {
                old.close()?;
                info!(
                    from = %old.path().display(),
                    to_hour = hour,
                    "rolling to next hourly file"
                );
                carried = Some(old.final_resource_states().clone());
            }

            let path = self.config.data_dir.join(filename_for_hour(hour));
            let mut file = BlockStorageFile::open(&path, hour, self.config.file_options())?;
            if let Some(states) = carried {
                file.import_final_states(&states);
            }
            self.current = Some(file);
        }

        Ok(self.current.as_mut().expect("current file set above"))
    }

    fn close_current(&mut self) -> Result<()> {
        match self.current.as_mut() {
            Some(f) => f.close(),
            None    => Ok(()),
        }
    }
}

/// Thread-safe facade over the data directory and the open hourly file.
pub struct Storage {
    inner: Arc<RwLock<StorageInner>>,
}

impl Storage {
    pub fn new(config: StorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(StorageInner { config, current: None })),
        })
    }

    /// Lifecycle hook; the first write opens the current hour's file lazily.
    pub fn start(&self) -> Result<()> {
        let inner = self.read_lock()?;
        info!(data_dir = %inner.config.data_dir.display(), "storage started");
        Ok(())
    }

    /// Close the current file, waiting at most `timeout`.
    ///
    /// On deadline the caller gets [`StoreError::Cancelled`], but the close
    /// keeps running on its thread and still completes — the file is not
    /// left without a footer unless the process dies.
    pub fn stop(&self, timeout: Duration) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let result = match inner.write() {
                Ok(mut guard) => guard.close_current(),
                Err(_)        => Err(poisoned()),
            };
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => {
                info!("storage stopped");
                result
            }
            Err(_) => {
                warn!(?timeout, "storage stop deadline elapsed; close continues in background");
                Err(StoreError::Cancelled)
            }
        }
    }

    /// Append one event to the file for the current wall-clock hour,
    /// rolling files when the hour changes.
    pub fn write_event(&self, event: Event) -> Result<()> {
        let hour = hour_bucket(Utc::now().timestamp());
        let mut inner = self.write_lock()?;
        inner.file_for(hour)?.write_event(event)
    }

    /// Events of the current hour's file: the open in-memory block plus any
    /// blocks already on disk in that file, filtered by the query.
    pub fn get_in_memory_events(&self, req: &QueryRequest) -> Result<Vec<Event>> {
        req.validate()?;
        let inner = self.read_lock()?;
        let Some(file) = inner.current.as_ref() else {
            return Ok(Vec::new());
        };

        let (start, end) = (req.start_nanos(), req.end_nanos());
        let mut events = Vec::new();

        for meta in file.blocks() {
            if !meta.overlaps(start, end) {
                continue;
            }
            for ev in file.read_block_events(meta)? {
                if ev.timestamp >= start && ev.timestamp <= end && req.filters.matches(&ev.resource)
                {
                    events.push(ev);
                }
            }
        }
        for ev in file.buffered_events() {
            if ev.timestamp >= start && ev.timestamp <= end && req.filters.matches(&ev.resource) {
                events.push(ev.clone());
            }
        }

        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    /// All hourly files in the data directory, sorted by name (= by hour).
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        let inner = self.read_lock()?;
        list_storage_files(&inner.config.data_dir)
    }

    /// Delete files whose filesystem modification time is older than
    /// `max_age_hours`.  The currently open file is never deleted.
    pub fn delete_old_files(&self, max_age_hours: u64) -> Result<usize> {
        let inner = self.read_lock()?;
        let current_path = inner.current.as_ref().map(|f| f.path().to_owned());
        let max_age = Duration::from_secs(max_age_hours * 3600);
        let now = SystemTime::now();

        let mut deleted = 0;
        for path in list_storage_files(&inner.config.data_dir)? {
            if Some(&path) == current_path.as_ref() {
                continue;
            }
            let modified = fs::metadata(&path)?.modified()?;
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age > max_age {
                fs::remove_file(&path)?;
                deleted += 1;
                info!(path = %path.display(), ?age, "deleted expired storage file");
            }
        }
        Ok(deleted)
    }

    /// Garbage-collect DELETEd resources from the current file's state table.
    pub fn cleanup_old_state_snapshots(&self, retention_days: u64) -> Result<usize> {
        let mut inner = self.write_lock()?;
        Ok(match inner.current.as_mut() {
            Some(f) => f.cleanup_old_state_snapshots(retention_days),
            None    => 0,
        })
    }

    /// Snapshot of the current file's final-resource-states table.
    pub fn final_resource_states(&self) -> Result<FinalResourceStates> {
        let inner = self.read_lock()?;
        Ok(inner
            .current
            .as_ref()
            .map(|f| f.final_resource_states().clone())
            .unwrap_or_default())
    }

    fn read_lock(&self) -> Result<std::sync::RwLockReadGuard<'_, StorageInner>> {
        self.inner.read().map_err(|_| poisoned())
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, StorageInner>> {
        self.inner.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> StoreError {
    StoreError::Io(io::Error::new(io::ErrorKind::Other, "storage lock poisoned"))
}

/// Directory walk shared by the storage manager and the query executor.
pub(crate) fn list_storage_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if hour_from_filename(name).is_some() {
            files.push(entry.path());
        } else {
            debug!(name, "ignoring non-storage file in data dir");
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::sample_event;
    use crate::query::QueryFilters;

    #[test]
    fn hour_naming_round_trip() {
        // 2024-03-01 10:00:00 UTC
        let hour = 1_709_287_200;
        let name = filename_for_hour(hour);
        assert_eq!(name, "2024-03-01-10.bin");
        assert_eq!(hour_from_filename(&name), Some(hour));
    }

    #[test]
    fn hour_bucket_truncates() {
        assert_eq!(hour_bucket(1_709_287_200), 1_709_287_200);
        assert_eq!(hour_bucket(1_709_287_200 + 1799), 1_709_287_200);
        assert_eq!(hour_bucket(1_709_287_200 + 3600), 1_709_287_200 + 3600);
    }

    #[test]
    fn rejects_malformed_filenames() {
        for name in ["2024-03-01.bin", "notes.txt", "2024-03-01-10.tmp", "2024-03-01-xx.bin"] {
            assert_eq!(hour_from_filename(name), None, "{name}");
        }
    }

    #[test]
    fn write_read_current_hour() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(StorageConfig {
            data_dir: dir.path().to_owned(),
            ..Default::default()
        })
        .unwrap();
        storage.start().unwrap();

        let now = Utc::now().timestamp_nanos_opt().unwrap();
        storage.write_event(sample_event("a", "Pod", "default", now)).unwrap();
        storage.write_event(sample_event("b", "Service", "default", now + 1)).unwrap();

        let req = QueryRequest {
            start_ts: now / 1_000_000_000 - 60,
            end_ts:   now / 1_000_000_000 + 60,
            filters:  QueryFilters {
                kind: Some("Pod".into()),
                ..Default::default()
            },
            limit: None,
        };
        let events = storage.get_in_memory_events(&req).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].resource.kind, "Pod");

        storage.stop(Duration::from_secs(5)).unwrap();
        assert_eq!(storage.list_files().unwrap().len(), 1);
    }

    #[test]
    fn delete_old_files_spares_fresh_ones() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(StorageConfig {
            data_dir: dir.path().to_owned(),
            ..Default::default()
        })
        .unwrap();

        let now = Utc::now().timestamp_nanos_opt().unwrap();
        storage.write_event(sample_event("a", "Pod", "default", now)).unwrap();
        storage.stop(Duration::from_secs(5)).unwrap();

        // Everything was just written; nothing is old enough to delete.
        assert_eq!(storage.delete_old_files(1).unwrap(), 0);
        assert_eq!(storage.list_files().unwrap().len(), 1);
    }
}
