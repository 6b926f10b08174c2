//! Sync Model
//!
//! Wire events, content references and host/viewer role state shared by
//! every execution context.

mod protocol;
mod source;
mod state;

pub use protocol::*;
pub use source::*;
pub use state::*;
