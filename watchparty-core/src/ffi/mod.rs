//! FFI bindings for native app integration
//!
//! This module provides the interface exposed via uniffi to Swift/Kotlin.

mod session;
mod types;

pub use session::*;
pub use types::*;
