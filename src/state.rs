//! Consistent-view state snapshots.
//!
//! Every file carries a `final_resource_states` table: the last known state
//! of each resource that has appeared in this file *or any predecessor*.
//! When the hourly roll opens a new file, the closed file's table is carried
//! forward, so a query never loses track of a resource that simply had no
//! events during its window.
//!
//! At query time, resources whose last observed state sits before the window
//! (and is not a DELETE) are re-introduced as synthetic events: id prefixed
//! `state-`, type UPDATE, timestamp clamped to the window start.  A resource
//! whose last state is DELETE is never injected, and entries whose DELETE is
//! older than the retention window are garbage collected.

use std::collections::BTreeSet;

use tracing::debug;

use crate::event::{Event, EventType, ResourceMeta};
use crate::index::{FinalResourceStates, ResourceState};
use crate::query::QueryFilters;

/// Id prefix of every synthetic state snapshot event.
pub const STATE_EVENT_PREFIX: &str = "state-";

const NANOS_PER_DAY: i64 = 86_400 * 1_000_000_000;

/// Record `event` as the new last-known state of its resource.
pub fn apply_event(states: &mut FinalResourceStates, event: &Event) {
    states.insert(
        event.resource_key(),
        ResourceState {
            uid:           event.resource.uid.clone(),
            event_type:    event.event_type,
            timestamp:     event.timestamp,
            resource_data: event.data.clone(),
        },
    );
}

/// Carry states forward from a predecessor file.
///
/// On a key collision (the destination was restored from disk and already
/// tracks the resource) the entry with the newer timestamp wins.
pub fn import_states(dst: &mut FinalResourceStates, src: &FinalResourceStates) {
    for (key, state) in src {
        match dst.get(key) {
            Some(existing) if existing.timestamp >= state.timestamp => {}
            _ => {
                dst.insert(key.clone(), state.clone());
            }
        }
    }
}

/// Drop entries whose last event is a DELETE older than `retention_days`.
///
/// Live resources are kept no matter how old their last event is — only
/// deleted ones age out.  Returns the number of entries removed.
pub fn cleanup_old_snapshots(
    states:         &mut FinalResourceStates,
    retention_days: u64,
    now:            i64,
) -> usize {
    let cutoff = now - retention_days as i64 * NANOS_PER_DAY;
    let before = states.len();
    states.retain(|_, s| !(s.event_type == EventType::Delete && s.timestamp < cutoff));
    let removed = before - states.len();
    if removed > 0 {
        debug!(removed, retention_days, "cleaned up old state snapshots");
    }
    removed
}

/// Split a `{group}/{version}/{kind}/{namespace}/{name}` key back into
/// resource metadata.  Returns `None` for malformed keys.
pub fn parse_resource_key(key: &str) -> Option<ResourceMeta> {
    let parts: Vec<&str> = key.split('/').collect();
    if parts.len() != 5 {
        return None;
    }
    Some(ResourceMeta {
        group:     parts[0].to_owned(),
        version:   parts[1].to_owned(),
        kind:      parts[2].to_owned(),
        namespace: parts[3].to_owned(),
        name:      parts[4].to_owned(),
        uid:       String::new(),
        involved_object_uid: None,
    })
}

/// Synthesize `state-` events for resources that pre-existed the window.
///
/// `present_keys` are the resource keys of real events already collected for
/// the window — a resource with real events is never injected.  DELETEd
/// resources are never injected.  The synthetic timestamp is
/// `max(last_timestamp, window_start)` so pre-existing resources anchor at
/// the window start.
pub fn synthesize_state_events(
    states:       &FinalResourceStates,
    window_start: i64,
    filters:      &QueryFilters,
    present_keys: &BTreeSet<String>,
) -> Vec<Event> {
    let mut out = Vec::new();
    for (key, state) in states {
        if state.event_type == EventType::Delete {
            continue;
        }
        if present_keys.contains(key) {
            continue;
        }
        let Some(mut resource) = parse_resource_key(key) else {
            debug!(key = %key, "skipping malformed resource key in state table");
            continue;
        };
        if !filters.matches(&resource) {
            continue;
        }
        resource.uid = state.uid.clone();

        out.push(Event {
            id:         format!("{STATE_EVENT_PREFIX}{key}"),
            timestamp:  state.timestamp.max(window_start),
            event_type: EventType::Update,
            resource,
            data:       state.resource_data.clone(),
        });
    }
    out
}
