//! Playback adapters
//!
//! The sync protocol never talks to a player directly. It goes through
//! [`PlaybackAdapter`], which has one implementation per kind of player:
//! - [`EmbeddedPlayerAdapter`] for a first-party player the host app embeds
//! - [`ExternalVideoAdapter`] for a native video element on a page we do not own

mod embedded;
pub(crate) mod external;

pub use embedded::*;
pub use external::*;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::sync::SourceRef;

/// Errors raised by an adapter
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The player or video element is not available yet; retry later
    #[error("Player is not ready")]
    NotReady,

    #[error("Player rejected the command: {0}")]
    Rejected(String),
}

/// Local player notifications the session cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerSignal {
    /// The player finished loading and can be controlled
    Ready,
    Playing,
    Paused,
    Seeking,
    Buffering,
    Ended,
}

/// Capability interface over the underlying player
pub trait PlaybackAdapter: Send + Sync {
    /// Current position in seconds
    fn current_time(&self) -> Result<f64, AdapterError>;

    fn play(&self) -> Result<(), AdapterError>;

    fn pause(&self) -> Result<(), AdapterError>;

    fn seek_to(&self, seconds: f64) -> Result<(), AdapterError>;

    /// Switch to another piece of content. Players that cannot change
    /// content themselves ignore this.
    fn cue(&self, _source: &SourceRef) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Start delivering local player notifications to `signals`. Adapters
    /// that need a forwarding task return its handle; the caller owns it.
    fn listen(&self, signals: mpsc::UnboundedSender<PlayerSignal>) -> Option<JoinHandle<()>>;
}
