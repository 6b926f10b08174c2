//! Extension bridge
//!
//! Hands the signed-in session and the active room from the web app to the
//! isolated extension context. Writes are last-write-wins into a shared
//! storage area; the extension reads them back to start its own session.

mod runtime;
mod storage;
pub mod token;

pub use runtime::*;
pub use storage::*;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::session::SessionError;
use crate::sync::Platform;

/// Storage key for [`AuthContext`]
pub const AUTH_KEY: &str = "watchparty_auth";

/// Storage key for [`ActiveRoomContext`]
pub const ACTIVE_ROOM_KEY: &str = "watchparty_active_room";

/// Bridge-related errors
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} is not allowed from a web page")]
    Forbidden(&'static str),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Credentials needed to reach the realtime server and membership table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub access_token: String,
    pub user_id: String,
    #[serde(alias = "supabaseUrl")]
    pub realtime_endpoint: String,
    pub anon_key: String,
    /// Token expiry, seconds since the epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl AuthContext {
    pub fn is_expired(&self, now_secs: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_secs)
    }
}

/// The room the user currently has open in the web app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRoomContext {
    pub room_id: String,
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// Who sent a bridge message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOrigin {
    /// The extension itself
    Internal,
    /// A web page
    External,
}

/// Bridge requests. A `null` payload clears the stored record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BridgeMessage {
    #[serde(rename = "SET_AUTH", alias = "WATCHPARTY_SET_AUTH")]
    SetAuth(Option<AuthContext>),
    #[serde(rename = "SET_ACTIVE_ROOM", alias = "WATCHPARTY_SET_ACTIVE_ROOM")]
    SetActiveRoom(Option<ActiveRoomContext>),
    #[serde(rename = "GET_STATE", alias = "WATCHPARTY_GET_STATE")]
    GetState,
}

impl BridgeMessage {
    fn name(&self) -> &'static str {
        match self {
            BridgeMessage::SetAuth(_) => "SET_AUTH",
            BridgeMessage::SetActiveRoom(_) => "SET_ACTIVE_ROOM",
            BridgeMessage::GetState => "GET_STATE",
        }
    }
}

/// Everything the bridge currently holds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeState {
    pub auth: Option<AuthContext>,
    pub active_room: Option<ActiveRoomContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_room: Option<ActiveRoomContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn error(error: impl ToString) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

/// Request handler over a [`BridgeStorage`]
pub struct ExtensionBridge<S: BridgeStorage> {
    storage: S,
}

impl<S: BridgeStorage> ExtensionBridge<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Decode and handle a raw message. Anything undecodable gets an error
    /// response.
    pub fn handle_value(&self, value: Value, origin: MessageOrigin) -> BridgeResponse {
        match serde_json::from_value::<BridgeMessage>(value) {
            Ok(message) => self.handle(message, origin),
            Err(e) => {
                debug!("Rejecting bridge message: {}", e);
                BridgeResponse::error(format!("Unsupported message: {}", e))
            }
        }
    }

    pub fn handle(&self, message: BridgeMessage, origin: MessageOrigin) -> BridgeResponse {
        let name = message.name();
        match self.apply(message, origin) {
            Ok(response) => response,
            Err(e) => {
                warn!("Bridge {} failed: {}", name, e);
                BridgeResponse::error(e)
            }
        }
    }

    fn apply(&self, message: BridgeMessage, origin: MessageOrigin) -> Result<BridgeResponse, BridgeError> {
        match message {
            BridgeMessage::SetAuth(auth) => {
                info!("Storing auth context (present: {})", auth.is_some());
                self.store(AUTH_KEY, auth.as_ref())?;
                Ok(BridgeResponse::ok())
            }
            BridgeMessage::SetActiveRoom(room) => {
                info!("Storing active room {:?}", room.as_ref().map(|r| &r.room_id));
                self.store(ACTIVE_ROOM_KEY, room.as_ref())?;
                Ok(BridgeResponse::ok())
            }
            BridgeMessage::GetState if origin == MessageOrigin::External => {
                Err(BridgeError::Forbidden("GET_STATE"))
            }
            BridgeMessage::GetState => {
                let state = self.state()?;
                Ok(BridgeResponse {
                    ok: true,
                    auth: state.auth,
                    active_room: state.active_room,
                    error: None,
                })
            }
        }
    }

    fn store<T: Serialize>(&self, key: &str, value: Option<&T>) -> Result<(), BridgeError> {
        let value = value.map(serde_json::to_value).transpose()?;
        self.storage.set(key, value)
    }

    /// Read both records. A record that no longer decodes reads as absent.
    pub fn state(&self) -> Result<BridgeState, BridgeError> {
        Ok(BridgeState {
            auth: self.load(AUTH_KEY)?,
            active_room: self.load(ACTIVE_ROOM_KEY)?,
        })
    }

    fn load<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, BridgeError> {
        let Some(value) = self.storage.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", key, e);
                Ok(None)
            }
        }
    }
}
