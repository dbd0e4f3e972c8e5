//! Event model and wire encoding.
//!
//! An [`Event`] is one immutable resource change.  The store treats the
//! payload (`data`) as opaque bytes — it is the raw resource JSON, but
//! nothing in this crate parses it.
//!
//! # Block frame
//!
//! Inside a block (before compression) events are a sequence of
//! length-prefixed records:
//!
//! ```text
//! [varint len][record bytes][varint len][record bytes]...
//! ```
//!
//! Lengths are unsigned LEB128 varints; records are protobuf messages
//! ([`EventRecord`]) for all new files.  The `json` encoding is decoded for
//! legacy files only — the writer never emits it.

use prost::bytes::Buf;
use prost::Message;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

// ── Event type ───────────────────────────────────────────────────────────────

/// Closed set of change verbs.  The `i32` values are the protobuf wire
/// representation and are frozen.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, prost::Enumeration,
)]
#[repr(i32)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Create = 0,
    Update = 1,
    Delete = 2,
}

impl EventType {
    pub fn name(self) -> &'static str {
        match self {
            EventType::Create => "CREATE",
            EventType::Update => "UPDATE",
            EventType::Delete => "DELETE",
        }
    }
}

// ── Resource metadata ────────────────────────────────────────────────────────

/// Identity of the resource an event concerns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMeta {
    /// API group; empty string for the core group.
    pub group:     String,
    pub version:   String,
    pub kind:      String,
    pub namespace: String,
    pub name:      String,
    pub uid:       String,
    /// Set only for the Kubernetes `Event` kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub involved_object_uid: Option<String>,
}

impl ResourceMeta {
    /// Stable per-resource key: `{group}/{version}/{kind}/{namespace}/{name}`.
    pub fn resource_key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.group, self.version, self.kind, self.namespace, self.name
        )
    }
}

// ── Event ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id:        String,
    /// Nanoseconds since the Unix epoch; always positive for real events.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub resource:  ResourceMeta,
    /// Opaque payload bytes (raw resource JSON).
    #[serde(with = "hex_bytes")]
    pub data:      Vec<u8>,
}

impl Event {
    pub fn payload_size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn resource_key(&self) -> String {
        self.resource.resource_key()
    }
}

// ── Encoding format ──────────────────────────────────────────────────────────

/// Record encoding named in the file header.  `Protobuf` is required for all
/// new files; `Json` exists to read legacy files only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingFormat {
    Protobuf,
    Json,
}

impl EncodingFormat {
    pub fn name(self) -> &'static str {
        match self {
            EncodingFormat::Protobuf => "protobuf",
            EncodingFormat::Json     => "json",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "protobuf" => Some(EncodingFormat::Protobuf),
            "json"     => Some(EncodingFormat::Json),
            _          => None,
        }
    }
}

impl Default for EncodingFormat {
    fn default() -> Self {
        EncodingFormat::Protobuf
    }
}

// ── Protobuf wire record ─────────────────────────────────────────────────────

/// On-disk protobuf form of an [`Event`].  Field tags are frozen.
#[derive(Clone, PartialEq, Message)]
pub struct EventRecord {
    #[prost(string, tag = "1")]
    pub id:        String,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
    #[prost(enumeration = "EventType", tag = "3")]
    pub event_type: i32,
    #[prost(string, tag = "4")]
    pub group:     String,
    #[prost(string, tag = "5")]
    pub version:   String,
    #[prost(string, tag = "6")]
    pub kind:      String,
    #[prost(string, tag = "7")]
    pub namespace: String,
    #[prost(string, tag = "8")]
    pub name:      String,
    #[prost(string, tag = "9")]
    pub uid:       String,
    #[prost(string, optional, tag = "10")]
    pub involved_object_uid: Option<String>,
    #[prost(bytes = "vec", tag = "11")]
    pub data:      Vec<u8>,
}

impl From<&Event> for EventRecord {
    fn from(ev: &Event) -> Self {
        EventRecord {
            id:         ev.id.clone(),
            timestamp:  ev.timestamp,
            event_type: ev.event_type as i32,
            group:      ev.resource.group.clone(),
            version:    ev.resource.version.clone(),
            kind:       ev.resource.kind.clone(),
            namespace:  ev.resource.namespace.clone(),
            name:       ev.resource.name.clone(),
            uid:        ev.resource.uid.clone(),
            involved_object_uid: ev.resource.involved_object_uid.clone(),
            data:       ev.data.clone(),
        }
    }
}

impl TryFrom<EventRecord> for Event {
    type Error = StoreError;

    fn try_from(rec: EventRecord) -> Result<Self> {
        let event_type = EventType::try_from(rec.event_type)
            .map_err(|_| StoreError::Encoding(format!("unknown event type {}", rec.event_type)))?;
        Ok(Event {
            id:        rec.id,
            timestamp: rec.timestamp,
            event_type,
            resource: ResourceMeta {
                group:     rec.group,
                version:   rec.version,
                kind:      rec.kind,
                namespace: rec.namespace,
                name:      rec.name,
                uid:       rec.uid,
                involved_object_uid: rec.involved_object_uid,
            },
            data: rec.data,
        })
    }
}

// ── Record + frame codecs ────────────────────────────────────────────────────

/// Encode one event in the given format.
pub fn encode_event(event: &Event, encoding: EncodingFormat) -> Result<Vec<u8>> {
    match encoding {
        EncodingFormat::Protobuf => Ok(EventRecord::from(event).encode_to_vec()),
        EncodingFormat::Json => {
            serde_json::to_vec(event).map_err(|e| StoreError::Encoding(e.to_string()))
        }
    }
}

/// Decode one event record.
pub fn decode_event(bytes: &[u8], encoding: EncodingFormat) -> Result<Event> {
    match encoding {
        EncodingFormat::Protobuf => {
            let rec = EventRecord::decode(bytes)
                .map_err(|e| StoreError::Encoding(e.to_string()))?;
            Event::try_from(rec)
        }
        EncodingFormat::Json => {
            serde_json::from_slice(bytes).map_err(|e| StoreError::Encoding(e.to_string()))
        }
    }
}

/// Serialize events into the uncompressed block frame.
pub fn encode_frame(events: &[Event], encoding: EncodingFormat) -> Result<Vec<u8>> {
    let mut frame = Vec::new();
    for ev in events {
        let bytes = encode_event(ev, encoding)?;
        prost::encoding::encode_varint(bytes.len() as u64, &mut frame);
        frame.extend_from_slice(&bytes);
    }
    Ok(frame)
}

/// Walk a decompressed block frame back into events.
pub fn decode_frame(frame: &[u8], encoding: EncodingFormat) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    let mut cur = frame;
    while cur.has_remaining() {
        let len = prost::encoding::decode_varint(&mut cur)
            .map_err(|e| StoreError::Encoding(format!("record length: {e}")))? as usize;
        if len > cur.remaining() {
            return Err(StoreError::Encoding(format!(
                "record length {len} exceeds remaining frame bytes {}",
                cur.remaining()
            )));
        }
        let (record, rest) = cur.split_at(len);
        events.push(decode_event(record, encoding)?);
        cur = rest;
    }
    Ok(events)
}

// ── Serde helper: bytes as hex strings ───────────────────────────────────────

/// Serialize `Vec<u8>` as a hex string in JSON documents (index section,
/// legacy event encoding) instead of an integer array.
pub(crate) mod hex_bytes {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(D::Error::custom)
    }
}
