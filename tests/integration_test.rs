use rpkstore::event::{Event, EventType, ResourceMeta};
use rpkstore::query::{CancelToken, QueryExecutor, QueryFilters, QueryRequest};
use rpkstore::reader::BlockReader;
use rpkstore::storage::{filename_for_hour, hour_bucket};
use rpkstore::writer::{BlockStorageFile, FileOptions};
use rpkstore::StoreError;
use std::path::PathBuf;
use tempfile::TempDir;

// 2024-03-01 12:00:00 UTC — all scenario clocks hang off this.
const BASE: i64 = 1_709_294_400;
const NANOS: i64 = 1_000_000_000;

fn event(id: &str, kind: &str, namespace: &str, name: &str, ts_ns: i64, et: EventType) -> Event {
    Event {
        id:         id.to_owned(),
        timestamp:  ts_ns,
        event_type: et,
        resource: ResourceMeta {
            group:     "apps".into(),
            version:   "v1".into(),
            kind:      kind.into(),
            namespace: namespace.into(),
            name:      name.into(),
            uid:       format!("uid-{name}"),
            involved_object_uid: None,
        },
        data: format!("{{\"metadata\":{{\"name\":\"{name}\"}}}}").into_bytes(),
    }
}

fn file_path(dir: &TempDir, hour: i64) -> PathBuf {
    dir.path().join(filename_for_hour(hour))
}

// ── Restart and append ───────────────────────────────────────────────────────

#[test]
fn restart_and_append() {
    let dir = TempDir::new().unwrap();
    let hour = hour_bucket(BASE);
    let path = file_path(&dir, hour);

    {
        let mut w = BlockStorageFile::open(&path, hour, FileOptions::default()).unwrap();
        for i in 0..5 {
            w.write_event(event(
                &format!("e{i}"),
                "Pod",
                "default",
                &format!("pod-{i}"),
                (BASE + i) * NANOS,
                EventType::Create,
            ))
            .unwrap();
        }
        w.close().unwrap();
    }

    // Reopen: counters and states restored.
    let mut w = BlockStorageFile::open(&path, hour, FileOptions::default()).unwrap();
    assert_eq!(w.total_events(), 5);
    assert_eq!(w.next_block_id(), w.blocks().len() as u32);
    assert_eq!(w.final_resource_states().len(), 5);

    for i in 5..8 {
        w.write_event(event(
            &format!("e{i}"),
            "Pod",
            "default",
            &format!("pod-{i}"),
            (BASE + i) * NANOS,
            EventType::Create,
        ))
        .unwrap();
    }
    w.close().unwrap();

    // Final file yields all 8 events in insertion order.
    let mut r = BlockReader::open(&path).unwrap();
    let (footer, section) = r.read_index().unwrap();
    assert_eq!(
        footer.index_section_offset + u64::from(footer.index_section_length) + 324,
        std::fs::metadata(&path).unwrap().len()
    );
    assert_eq!(section.statistics.total_events, 8);

    let mut ids = Vec::new();
    for meta in &section.block_metadata {
        for ev in r.read_block_events(meta).unwrap() {
            ids.push(ev.id);
        }
    }
    assert_eq!(ids, (0..8).map(|i| format!("e{i}")).collect::<Vec<_>>());
}

#[test]
fn reopen_without_writes_reproduces_the_index() {
    let dir = TempDir::new().unwrap();
    let hour = hour_bucket(BASE);
    let path = file_path(&dir, hour);

    {
        let mut w = BlockStorageFile::open(&path, hour, FileOptions::default()).unwrap();
        for i in 0..3 {
            w.write_event(event(
                &format!("e{i}"),
                "Service",
                "default",
                &format!("svc-{i}"),
                (BASE + i) * NANOS,
                EventType::Update,
            ))
            .unwrap();
        }
        w.close().unwrap();
    }
    let original = BlockReader::open(&path).unwrap().read_index().unwrap().1;

    {
        let mut w = BlockStorageFile::open(&path, hour, FileOptions::default()).unwrap();
        w.close().unwrap();
    }
    let rewritten = BlockReader::open(&path).unwrap().read_index().unwrap().1;

    assert_eq!(rewritten, original);
}

// ── Query execution ──────────────────────────────────────────────────────────

#[test]
fn query_filters_prune_and_limit() {
    let dir = TempDir::new().unwrap();
    let h1 = hour_bucket(BASE);
    let h2 = h1 + 3600;

    {
        let mut w = BlockStorageFile::open(&file_path(&dir, h1), h1, FileOptions::default())
            .unwrap();
        for i in 0..4 {
            w.write_event(event(
                &format!("p{i}"),
                "Pod",
                "default",
                &format!("pod-{i}"),
                (h1 + 60 * i) * NANOS,
                EventType::Update,
            ))
            .unwrap();
        }
        w.write_event(event(
            "s0",
            "Service",
            "kube-system",
            "svc-0",
            (h1 + 120) * NANOS,
            EventType::Update,
        ))
        .unwrap();
        w.close().unwrap();
    }
    {
        let mut w = BlockStorageFile::open(&file_path(&dir, h2), h2, FileOptions::default())
            .unwrap();
        w.write_event(event(
            "p9",
            "Pod",
            "default",
            "pod-9",
            (h2 + 30) * NANOS,
            EventType::Update,
        ))
        .unwrap();
        w.close().unwrap();
    }

    let exec = QueryExecutor::new(dir.path());

    // Kind filter spans both files.
    let result = exec
        .execute(&QueryRequest {
            start_ts: h1,
            end_ts:   h2 + 3600,
            filters:  QueryFilters { kind: Some("Pod".into()), ..Default::default() },
            limit:    None,
        })
        .unwrap();
    assert_eq!(result.files_searched, 2);
    assert!(result.failures.is_empty());
    assert_eq!(result.count, 5);
    assert!(result.events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(result.events.iter().all(|e| e.resource.kind == "Pod"));

    // A filter value absent from every file prunes everything.
    let result = exec
        .execute(&QueryRequest {
            start_ts: h1,
            end_ts:   h2 + 3600,
            filters:  QueryFilters { kind: Some("DaemonSet".into()), ..Default::default() },
            limit:    None,
        })
        .unwrap();
    assert_eq!(result.count, 0);
    assert_eq!(result.segments_scanned, 0);
    assert!(result.segments_skipped > 0);

    // Limit applies after the sort.
    let result = exec
        .execute(&QueryRequest {
            start_ts: h1,
            end_ts:   h2 + 3600,
            filters:  QueryFilters::default(),
            limit:    Some(2),
        })
        .unwrap();
    assert_eq!(result.count, 2);
    assert_eq!(result.events[0].id, "p0");
}

#[test]
fn query_time_window_gates_events() {
    let dir = TempDir::new().unwrap();
    let hour = hour_bucket(BASE);

    {
        let mut w = BlockStorageFile::open(&file_path(&dir, hour), hour, FileOptions::default())
            .unwrap();
        for (id, offset) in [("early", 10), ("mid", 1800), ("late", 3500)] {
            w.write_event(event(
                id,
                "Pod",
                "default",
                id,
                (hour + offset) * NANOS,
                EventType::Update,
            ))
            .unwrap();
        }
        w.close().unwrap();
    }

    let result = QueryExecutor::new(dir.path())
        .execute(&QueryRequest {
            start_ts: hour + 1000,
            end_ts:   hour + 3000,
            filters:  QueryFilters::default(),
            limit:    None,
        })
        .unwrap();
    // Only the event inside [start, end] survives; injected state events for
    // the other pods are allowed but must not echo the real ones.
    let real: Vec<&Event> = result.events.iter().filter(|e| !e.id.starts_with("state-")).collect();
    assert_eq!(real.len(), 1);
    assert_eq!(real[0].id, "mid");
}

#[test]
fn cancelled_query_discards_results() {
    let dir = TempDir::new().unwrap();
    let hour = hour_bucket(BASE);
    {
        let mut w = BlockStorageFile::open(&file_path(&dir, hour), hour, FileOptions::default())
            .unwrap();
        w.write_event(event("e", "Pod", "default", "p", (hour + 1) * NANOS, EventType::Create))
            .unwrap();
        w.close().unwrap();
    }

    let token = CancelToken::new();
    token.cancel();
    let err = QueryExecutor::new(dir.path())
        .execute_with_cancel(
            &QueryRequest {
                start_ts: hour,
                end_ts:   hour + 3600,
                ..Default::default()
            },
            &token,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Cancelled));
}

// ── Consistent view ──────────────────────────────────────────────────────────

#[test]
fn consistent_view_injects_pre_existing_resources() {
    let dir = TempDir::new().unwrap();

    // F1 covers 10:00; the pod's only event is at 10:40 (t = -80 min).
    let h1 = BASE - 7200;
    let pod_ts = (BASE - 4800) * NANOS;
    let mut f1 = BlockStorageFile::open(&file_path(&dir, h1), h1, FileOptions::default())
        .unwrap();
    f1.write_event(event("pod-create", "Pod", "default", "web", pod_ts, EventType::Create))
        .unwrap();
    f1.close().unwrap();

    // F2 covers 11:00 with unrelated events; states carried forward on roll.
    let h2 = BASE - 3600;
    let mut f2 = BlockStorageFile::open(&file_path(&dir, h2), h2, FileOptions::default())
        .unwrap();
    f2.import_final_states(f1.final_resource_states());
    f2.write_event(event(
        "svc-update",
        "Service",
        "default",
        "api",
        (BASE - 3500) * NANOS,
        EventType::Update,
    ))
    .unwrap();
    f2.close().unwrap();

    // Window [-60 min, now]: the pod pre-exists it and had no events in it.
    let req = QueryRequest {
        start_ts: BASE - 3600,
        end_ts:   BASE,
        filters:  QueryFilters::default(),
        limit:    None,
    };
    let result = QueryExecutor::new(dir.path()).execute(&req).unwrap();

    let pods: Vec<&Event> =
        result.events.iter().filter(|e| e.resource.kind == "Pod").collect();
    assert_eq!(pods.len(), 1, "pre-existing pod must appear exactly once");
    assert!(pods[0].id.starts_with("state-"));
    assert_eq!(pods[0].timestamp, (BASE - 3600) * NANOS);
    assert_eq!(pods[0].event_type, EventType::Update);
    assert_eq!(pods[0].resource.uid, "uid-web");

    // Delete the pod at -50 min; its state must no longer be injected.
    let mut f2 = BlockStorageFile::open(&file_path(&dir, h2), h2, FileOptions::default())
        .unwrap();
    f2.write_event(event(
        "pod-delete",
        "Pod",
        "default",
        "web",
        (BASE - 3000) * NANOS,
        EventType::Delete,
    ))
    .unwrap();
    f2.close().unwrap();

    let result = QueryExecutor::new(dir.path()).execute(&req).unwrap();
    assert!(
        !result.events.iter().any(|e| e.id.starts_with("state-") && e.resource.kind == "Pod"),
        "deleted pod must not be injected"
    );
    let real_pods: Vec<&Event> = result
        .events
        .iter()
        .filter(|e| e.resource.kind == "Pod")
        .collect();
    assert_eq!(real_pods.len(), 1);
    assert_eq!(real_pods[0].event_type, EventType::Delete);
}

#[test]
fn state_retention_drops_old_deletes_only() {
    let dir = TempDir::new().unwrap();
    let now = chrono::Utc::now().timestamp();
    let hour = hour_bucket(now);
    let twenty_days_ago = (now - 20 * 86_400) * NANOS;

    let mut w = BlockStorageFile::open(&file_path(&dir, hour), hour, FileOptions::default())
        .unwrap();
    w.write_event(event(
        "del",
        "Pod",
        "default",
        "old-deleted",
        twenty_days_ago,
        EventType::Delete,
    ))
    .unwrap();
    w.write_event(event(
        "live",
        "Pod",
        "default",
        "old-living",
        twenty_days_ago,
        EventType::Create,
    ))
    .unwrap();

    let removed = w.cleanup_old_state_snapshots(14);
    assert_eq!(removed, 1);

    let states = w.final_resource_states();
    assert!(!states.contains_key("apps/v1/Pod/default/old-deleted"));
    assert!(states.contains_key("apps/v1/Pod/default/old-living"));
    w.close().unwrap();
}

// ── Damaged files ────────────────────────────────────────────────────────────

#[test]
fn footerless_file_contributes_nothing_and_no_error() {
    let dir = TempDir::new().unwrap();
    let hour = hour_bucket(BASE);

    // One good file, one mid-write file (header only, no footer).
    {
        let mut w = BlockStorageFile::open(&file_path(&dir, hour), hour, FileOptions::default())
            .unwrap();
        w.write_event(event("ok", "Pod", "default", "p", (hour + 1) * NANOS, EventType::Create))
            .unwrap();
        w.close().unwrap();
    }
    let mid = file_path(&dir, hour + 3600);
    let mut bytes = Vec::new();
    rpkstore::FileHeader::new(
        rpkstore::Compression::Zstd,
        1024,
        rpkstore::EncodingFormat::Protobuf,
        false,
    )
    .write(&mut bytes)
    .unwrap();
    std::fs::write(&mid, &bytes).unwrap();

    let result = QueryExecutor::new(dir.path())
        .execute(&QueryRequest {
            start_ts: hour,
            end_ts:   hour + 7200,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(result.files_searched, 2);
    assert!(result.failures.is_empty(), "mid-write files are not failures");
    assert_eq!(
        result.events.iter().filter(|e| !e.id.starts_with("state-")).count(),
        1
    );
}

#[test]
fn corrupt_index_section_is_reported_per_file() {
    let dir = TempDir::new().unwrap();
    let hour = hour_bucket(BASE);
    let path = file_path(&dir, hour);

    {
        let mut w = BlockStorageFile::open(&path, hour, FileOptions::default()).unwrap();
        w.write_event(event("e", "Pod", "default", "p", (hour + 1) * NANOS, EventType::Create))
            .unwrap();
        w.close().unwrap();
    }

    // Flip a byte inside the index section; the footer stays valid.
    let mut r = BlockReader::open(&path).unwrap();
    let footer = r.read_file_footer().unwrap();
    drop(r);
    let mut bytes = std::fs::read(&path).unwrap();
    let i = footer.index_section_offset as usize + 2;
    bytes[i] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let result = QueryExecutor::new(dir.path())
        .execute(&QueryRequest {
            start_ts: hour,
            end_ts:   hour + 3600,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].path, path);
    assert_eq!(result.count, 0);
}

#[test]
fn pathological_one_byte_threshold_still_works() {
    let dir = TempDir::new().unwrap();
    let hour = hour_bucket(BASE);
    let path = file_path(&dir, hour);

    let options = FileOptions { block_size_threshold: 1, ..Default::default() };
    {
        let mut w = BlockStorageFile::open(&path, hour, options).unwrap();
        for i in 0..3 {
            w.write_event(event(
                &format!("e{i}"),
                "Pod",
                "default",
                &format!("p{i}"),
                (hour + i) * NANOS,
                EventType::Create,
            ))
            .unwrap();
        }
        w.close().unwrap();
    }

    let mut r = BlockReader::open(&path).unwrap();
    let (_, section) = r.read_index().unwrap();
    // Every event became its own block.
    assert_eq!(section.block_metadata.len(), 3);
    let mut total = 0;
    for meta in &section.block_metadata {
        total += r.read_block_events(meta).unwrap().len();
    }
    assert_eq!(total, 3);
}
