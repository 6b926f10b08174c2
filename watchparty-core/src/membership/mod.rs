//! Room membership storage
//!
//! Membership rows live in an external table. The protocol only needs a
//! handful of primitives on top of it; host uniqueness is built from these
//! by convention in [`RoleState`](crate::sync::RoleState), not enforced by
//! the store.

mod client;
mod memory;

pub use client::*;
pub use memory::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::sync::{Role, RoomMembership};

/// Errors that can occur when talking to the membership store
#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Membership store is not reachable")]
    NotReachable,

    #[error("Not authorized to access room membership")]
    Unauthorized,

    #[error("Store error: {0}")]
    Api(String),
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// All rows of a room, oldest join first
    async fn members(&self, room_id: &str) -> Result<Vec<RoomMembership>, MembershipError>;

    /// Role of one participant, `None` if they have no row
    async fn role_of(&self, room_id: &str, user_id: &str) -> Result<Option<Role>, MembershipError>;

    /// Insert a viewer row unless the participant already has one
    async fn ensure_member(&self, room_id: &str, user_id: &str) -> Result<(), MembershipError>;

    async fn set_role(&self, room_id: &str, user_id: &str, role: Role) -> Result<(), MembershipError>;

    /// Set every host row of the room back to viewer
    async fn demote_hosts(&self, room_id: &str) -> Result<(), MembershipError>;
}
