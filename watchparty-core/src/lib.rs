//! WatchParty - Core Library
//!
//! This library keeps video playback in step across the members of a room.
//! One member is host; their player state is broadcast over a realtime
//! channel and every viewer's player follows it.

pub mod adapter;
pub mod bridge;
pub mod channel;
pub mod config;
pub mod drift;
pub mod echo;
pub mod ffi;
pub mod membership;
pub mod seek_debouncer;
pub mod session;
pub mod sync;

// Re-exports for convenience
pub use config::SyncTiming;
pub use session::{RoomSession, SessionContext, SessionError};
pub use sync::{Platform, Role, SourceRef, SyncEvent};

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();
