//! Sync Channel
//!
//! The pub/sub transport is a black box to the protocol: publish and
//! subscribe per room topic, plus ephemeral presence. Two implementations:
//! - [`RealtimeChannel`]: direct websocket protocol against the realtime server
//! - [`LocalChannel`]: in-process hub, for participants sharing one process

mod frame;
mod local;
mod realtime;

pub use frame::*;
pub use local::*;
pub use realtime::*;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::sync::{PresenceSet, SyncEvent};

/// Channel-related errors
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Not subscribed to room {0}")]
    NotSubscribed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel task closed")]
    Closed,
}

/// Transport connectivity as seen by one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
        })
    }
}

/// Events delivered on a room subscription
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A sync event from another participant
    Sync(SyncEvent),
    /// The full presence set after a transport presence sync
    Presence(PresenceSet),
    /// Connectivity changed. After a reconnect nothing is replayed.
    Status(ConnectionStatus),
}

/// Contract over the pub/sub transport
#[async_trait]
pub trait SyncChannel: Send + Sync {
    /// Subscribe to a room topic. Re-subscription after a transport
    /// reconnect is the implementation's job.
    async fn subscribe(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<ChannelEvent>, ChannelError>;

    /// Fire-and-forget broadcast to everyone else on the topic
    fn publish(&self, room_id: &str, event: &SyncEvent) -> Result<(), ChannelError>;

    /// Announce our presence on the topic; released on unsubscribe
    async fn track_presence(&self, room_id: &str, user_id: &str) -> Result<(), ChannelError>;

    /// Participants currently present on the topic
    fn presence_snapshot(&self, room_id: &str) -> PresenceSet;

    /// Leave the topic, releasing presence
    async fn unsubscribe(&self, room_id: &str);
}
