//! Realtime wire frames
//!
//! Every frame is a JSON object `{topic, event, payload, ref}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::sync::{PresenceSet, SyncEvent};

/// Control topic the transport heartbeat is sent on
pub const HEARTBEAT_TOPIC: &str = "phoenix";

/// Broadcast sub-event carrying sync events
pub const SYNC_EVENT: &str = "sync";

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_BROADCAST: &str = "broadcast";
pub const EVENT_PRESENCE: &str = "presence";
pub const EVENT_PRESENCE_STATE: &str = "presence_state";
pub const EVENT_PRESENCE_DIFF: &str = "presence_diff";

/// Topic name for a room
pub fn room_topic(room_id: &str) -> String {
    format!("room-{}", room_id)
}

/// Room id from a topic name
pub fn room_from_topic(topic: &str) -> Option<&str> {
    topic.strip_prefix("room-")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    fn new(topic: impl Into<String>, event: &str, payload: Value, reference: u64) -> Self {
        Self {
            topic: topic.into(),
            event: event.to_string(),
            payload,
            reference: Some(reference.to_string()),
        }
    }

    /// Join a room topic. Broadcasts are not echoed back to us.
    pub fn join(room_id: &str, presence_key: &str, reference: u64) -> Self {
        Self::new(
            room_topic(room_id),
            EVENT_JOIN,
            json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": presence_key }
                }
            }),
            reference,
        )
    }

    pub fn leave(room_id: &str, reference: u64) -> Self {
        Self::new(room_topic(room_id), EVENT_LEAVE, json!({}), reference)
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self::new(HEARTBEAT_TOPIC, EVENT_HEARTBEAT, json!({}), reference)
    }

    pub fn broadcast(room_id: &str, event: &SyncEvent, reference: u64) -> Self {
        Self::new(
            room_topic(room_id),
            EVENT_BROADCAST,
            json!({ "event": SYNC_EVENT, "payload": event.to_value() }),
            reference,
        )
    }

    pub fn track(room_id: &str, user_id: &str, reference: u64) -> Self {
        Self::new(
            room_topic(room_id),
            EVENT_PRESENCE,
            json!({
                "type": "presence",
                "event": "track",
                "payload": { "user_id": user_id }
            }),
            reference,
        )
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Sync event inside a broadcast frame, if this is one and it decodes
    pub fn sync_event(&self) -> Option<SyncEvent> {
        if self.event != EVENT_BROADCAST {
            return None;
        }
        if self.payload.get("event").and_then(Value::as_str) != Some(SYNC_EVENT) {
            return None;
        }
        SyncEvent::from_value(self.payload.get("payload")?.clone())
    }

    /// Whether this is a reply reporting failure
    pub fn is_error_reply(&self) -> bool {
        self.event == EVENT_REPLY
            && self.payload.get("status").and_then(Value::as_str) == Some("error")
    }
}

/// Keys of a presence map (`{ "<key>": { "metas": [...] }, ... }`)
fn presence_keys(value: Option<&Value>) -> impl Iterator<Item = String> + '_ {
    value
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|map| map.keys().cloned())
}

/// Apply a `presence_state` or `presence_diff` frame to `presence`.
/// Returns false for any other frame.
pub fn apply_presence(frame: &Frame, presence: &mut PresenceSet) -> bool {
    match frame.event.as_str() {
        EVENT_PRESENCE_STATE => {
            *presence = presence_keys(Some(&frame.payload)).collect();
            true
        }
        EVENT_PRESENCE_DIFF => {
            for key in presence_keys(frame.payload.get("leaves")) {
                presence.remove(&key);
            }
            for key in presence_keys(frame.payload.get("joins")) {
                presence.insert(key);
            }
            true
        }
        _ => false,
    }
}
