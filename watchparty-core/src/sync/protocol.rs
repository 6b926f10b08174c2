//! Sync Protocol Messages

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::source::SourceRef;

/// Which kind of player a room is watched on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// A first-party player embedded in the page
    #[serde(alias = "youtube")]
    Embeddable,
    /// A third-party player the page does not control
    #[serde(alias = "netflix")]
    External,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Embeddable => "embeddable",
            Platform::External => "external",
        }
    }
}

/// Kind of sync event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Play,
    Pause,
    Seek,
    SetSource,
    Ping,
}

impl EventKind {
    /// Parse the wire `type` string. Unknown types yield `None`.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "PLAY" => Some(EventKind::Play),
            "PAUSE" => Some(EventKind::Pause),
            "SEEK" => Some(EventKind::Seek),
            "SET_SOURCE" => Some(EventKind::SetSource),
            "PING" => Some(EventKind::Ping),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            EventKind::Play => "PLAY",
            EventKind::Pause => "PAUSE",
            EventKind::Seek => "SEEK",
            EventKind::SetSource => "SET_SOURCE",
            EventKind::Ping => "PING",
        }
    }

    /// Every kind except SET_SOURCE must carry a position
    pub fn requires_video_time(&self) -> bool {
        !matches!(self, EventKind::SetSource)
    }
}

/// Payload shared by every sync event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub room_id: String,
    pub platform: Platform,
    /// Playback position in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_time: Option<f64>,
    /// Send time, milliseconds since UNIX epoch
    pub ts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, alias = "videoId", skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

impl EventPayload {
    /// Content reference carried by this payload, if any
    pub fn source(&self) -> Option<SourceRef> {
        let source = SourceRef {
            content_id: self.content_id.clone(),
            source_url: self.source_url.clone(),
        };
        (!source.is_empty()).then_some(source)
    }
}

/// A sync event exchanged on a room topic.
///
/// Events are immutable once built. They carry no identity beyond
/// `(sender_id, payload.ts)`; receivers tolerate duplicates and reordering.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    #[serde(rename = "type")]
    kind: EventKind,
    sender_id: String,
    payload: EventPayload,
}

/// Loose shape used for decoding so that unknown `type` values can be
/// dropped instead of failing the whole frame
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    sender_id: String,
    payload: EventPayload,
}

impl SyncEvent {
    fn build(
        kind: EventKind,
        sender_id: &str,
        room_id: &str,
        platform: Platform,
        video_time: Option<f64>,
        source: Option<&SourceRef>,
    ) -> Self {
        Self {
            kind,
            sender_id: sender_id.to_string(),
            payload: EventPayload {
                room_id: room_id.to_string(),
                platform,
                video_time,
                ts: current_time_ms(),
                source_url: source.and_then(|s| s.source_url.clone()),
                content_id: source.and_then(|s| s.content_id.clone()),
            },
        }
    }

    pub fn play(sender_id: &str, room_id: &str, platform: Platform, video_time: f64, source: Option<&SourceRef>) -> Self {
        Self::build(EventKind::Play, sender_id, room_id, platform, Some(video_time), source)
    }

    pub fn pause(sender_id: &str, room_id: &str, platform: Platform, video_time: f64, source: Option<&SourceRef>) -> Self {
        Self::build(EventKind::Pause, sender_id, room_id, platform, Some(video_time), source)
    }

    pub fn seek(sender_id: &str, room_id: &str, platform: Platform, video_time: f64, source: Option<&SourceRef>) -> Self {
        Self::build(EventKind::Seek, sender_id, room_id, platform, Some(video_time), source)
    }

    pub fn ping(sender_id: &str, room_id: &str, platform: Platform, video_time: f64, source: Option<&SourceRef>) -> Self {
        Self::build(EventKind::Ping, sender_id, room_id, platform, Some(video_time), source)
    }

    pub fn set_source(
        sender_id: &str,
        room_id: &str,
        platform: Platform,
        source: &SourceRef,
        video_time: Option<f64>,
    ) -> Self {
        Self::build(EventKind::SetSource, sender_id, room_id, platform, video_time, Some(source))
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn room_id(&self) -> &str {
        &self.payload.room_id
    }

    pub fn video_time(&self) -> Option<f64> {
        self.payload.video_time
    }

    /// Encode to the JSON value carried inside a broadcast frame
    pub fn to_value(&self) -> serde_json::Value {
        // Plain strings, floats and integers cannot fail to serialize
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Decode a wire event. Returns `None` for unknown types, missing
    /// fields, or a position-carrying kind without `videoTime`; unknown
    /// extra fields are ignored.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        let wire: WireEvent = match serde_json::from_value(value) {
            Ok(wire) => wire,
            Err(e) => {
                trace!("Dropping malformed sync event: {}", e);
                return None;
            }
        };

        let Some(kind) = EventKind::from_wire(&wire.kind) else {
            trace!("Dropping sync event with unknown type {:?}", wire.kind);
            return None;
        };

        if kind.requires_video_time() && wire.payload.video_time.is_none() {
            trace!("Dropping {} without videoTime", kind.as_wire());
            return None;
        }

        Some(Self {
            kind,
            sender_id: wire.sender_id,
            payload: wire.payload,
        })
    }
}

/// Get current time in milliseconds since UNIX epoch
pub fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
