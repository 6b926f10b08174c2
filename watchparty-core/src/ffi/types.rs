//! FFI types exposed via uniffi

use crate::bridge::{AuthContext, BridgeError};
use crate::channel::ConnectionStatus;
use crate::session::{SessionError, SessionStatus};
use crate::sync::{PresenceSet, Role, SourceRef};

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Membership error: {0}")]
    MembershipError(String),

    #[error("Bridge error: {0}")]
    BridgeError(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Not in a room")]
    NotInRoom,

    #[error("Already in a room")]
    AlreadyInRoom,
}

impl From<SessionError> for CoreError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Channel(e) => CoreError::NetworkError(e.to_string()),
            SessionError::Membership(e) => CoreError::MembershipError(e.to_string()),
        }
    }
}

impl From<BridgeError> for CoreError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Session(e) => e.into(),
            e => CoreError::BridgeError(e.to_string()),
        }
    }
}

/// Sign-in details handed over by the host app
#[derive(Debug, Clone, uniffi::Record)]
pub struct AuthInfo {
    pub access_token: String,
    pub user_id: String,
    pub realtime_endpoint: String,
    pub anon_key: String,
    pub expires_at: Option<i64>,
}

impl From<AuthInfo> for AuthContext {
    fn from(a: AuthInfo) -> Self {
        Self {
            access_token: a.access_token,
            user_id: a.user_id,
            realtime_endpoint: a.realtime_endpoint,
            anon_key: a.anon_key,
            expires_at: a.expires_at,
        }
    }
}

/// Role exposed via FFI
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum MemberRole {
    Host,
    Viewer,
}

impl From<Role> for MemberRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Host => MemberRole::Host,
            Role::Viewer => MemberRole::Viewer,
        }
    }
}

/// Transport connectivity exposed via FFI
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl From<ConnectionStatus> for ConnectionState {
    fn from(status: ConnectionStatus) -> Self {
        match status {
            ConnectionStatus::Connecting => ConnectionState::Connecting,
            ConnectionStatus::Connected => ConnectionState::Connected,
            ConnectionStatus::Disconnected => ConnectionState::Disconnected,
        }
    }
}

/// What the room is watching
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct ContentInfo {
    pub content_id: Option<String>,
    pub source_url: Option<String>,
}

impl From<&SourceRef> for ContentInfo {
    fn from(s: &SourceRef) -> Self {
        Self {
            content_id: s.content_id.clone(),
            source_url: s.source_url.clone(),
        }
    }
}

/// Room status exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct RoomStatus {
    pub room_id: String,
    pub user_id: String,
    pub role: MemberRole,
    pub connection: ConnectionState,
    /// Human-readable status line, e.g. "Connected | Room abc | host"
    pub summary: String,
    pub participants: Vec<String>,
    pub content: Option<ContentInfo>,
}

impl RoomStatus {
    pub(crate) fn new(
        status: SessionStatus,
        user_id: &str,
        presence: &PresenceSet,
        source: Option<&SourceRef>,
    ) -> Self {
        Self {
            summary: status.to_string(),
            room_id: status.room_id,
            user_id: user_id.to_string(),
            role: status.role.into(),
            connection: status.connection.into(),
            participants: presence.iter().cloned().collect(),
            content: source.map(ContentInfo::from),
        }
    }
}

/// Callback interface for session events
#[uniffi::export(callback_interface)]
pub trait SessionCallback: Send + Sync {
    fn on_role_changed(&self, role: MemberRole);
    fn on_participants_changed(&self, participants: Vec<String>);
    fn on_connection_changed(&self, state: ConnectionState);
    fn on_content_changed(&self, content: ContentInfo);
    fn on_error(&self, message: String);
}

/// The host app's embedded player
#[uniffi::export(callback_interface)]
pub trait PlayerCallback: Send + Sync {
    /// Current position in seconds
    fn current_time(&self) -> f64;
    fn play(&self);
    fn pause(&self);
    fn seek_to(&self, seconds: f64);
    /// Load another video by id
    fn cue_video(&self, content_id: String);
}
