//! In-process membership store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{MembershipError, MembershipStore};
use crate::sync::{Role, RoomMembership};

/// Membership kept in memory, keyed by room. Can be switched unavailable
/// to exercise lookup failures.
#[derive(Default)]
pub struct InMemoryMembershipStore {
    rooms: Mutex<HashMap<String, Vec<RoomMembership>>>,
    unavailable: AtomicBool,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `NotReachable` while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Synchronous peek for assertions
    pub fn role_now(&self, room_id: &str, user_id: &str) -> Option<Role> {
        self.rooms
            .lock()
            .get(room_id)?
            .iter()
            .find(|m| m.user_id == user_id)
            .map(|m| m.role)
    }

    fn check(&self) -> Result<(), MembershipError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(MembershipError::NotReachable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn members(&self, room_id: &str) -> Result<Vec<RoomMembership>, MembershipError> {
        self.check()?;
        Ok(self.rooms.lock().get(room_id).cloned().unwrap_or_default())
    }

    async fn role_of(&self, room_id: &str, user_id: &str) -> Result<Option<Role>, MembershipError> {
        self.check()?;
        Ok(self.role_now(room_id, user_id))
    }

    async fn ensure_member(&self, room_id: &str, user_id: &str) -> Result<(), MembershipError> {
        self.check()?;
        let mut rooms = self.rooms.lock();
        let members = rooms.entry(room_id.to_string()).or_default();
        if !members.iter().any(|m| m.user_id == user_id) {
            members.push(RoomMembership {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                role: Role::Viewer,
                joined_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn set_role(&self, room_id: &str, user_id: &str, role: Role) -> Result<(), MembershipError> {
        self.check()?;
        let mut rooms = self.rooms.lock();
        if let Some(member) = rooms
            .get_mut(room_id)
            .and_then(|members| members.iter_mut().find(|m| m.user_id == user_id))
        {
            member.role = role;
        }
        Ok(())
    }

    async fn demote_hosts(&self, room_id: &str) -> Result<(), MembershipError> {
        self.check()?;
        if let Some(members) = self.rooms.lock().get_mut(room_id) {
            for member in members.iter_mut().filter(|m| m.role == Role::Host) {
                member.role = Role::Viewer;
            }
        }
        Ok(())
    }
}
