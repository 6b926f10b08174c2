//! Room membership and role state

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::membership::{MembershipError, MembershipStore};

/// A participant's role in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Viewer => "viewer",
        }
    }

    /// Parse a stored role string. Anything unrecognised is a viewer.
    pub fn parse(value: &str) -> Self {
        match value {
            "host" => Role::Host,
            _ => Role::Viewer,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the room membership table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMembership {
    pub room_id: String,
    pub user_id: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

/// Pick the effective host among the rows that claim it: earliest join
/// wins, ties broken by user id
pub fn resolve_host(members: &[RoomMembership]) -> Option<&RoomMembership> {
    members
        .iter()
        .filter(|m| m.role == Role::Host)
        .min_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        })
}

/// Participants currently connected to a room topic.
///
/// Rebuilt from every transport presence sync; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSet {
    users: BTreeSet<String>,
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, user_id: impl Into<String>) -> bool {
        self.users.insert(user_id.into())
    }

    pub fn remove(&mut self, user_id: &str) -> bool {
        self.users.remove(user_id)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users.contains(user_id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.users.iter()
    }

    /// Users present here but not in `previous`
    pub fn joined_since(&self, previous: &PresenceSet) -> Vec<String> {
        self.users.difference(&previous.users).cloned().collect()
    }
}

impl FromIterator<String> for PresenceSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            users: iter.into_iter().collect(),
        }
    }
}

/// How a context learns its role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleMode {
    /// Join the membership table, claim host if vacant, re-read on every
    /// structural membership change
    Claim,
    /// Never write membership; look the role up periodically
    Poll,
}

/// Host/viewer state of the local participant in one room.
///
/// Host uniqueness is advisory: two participants joining an empty room
/// at the same time may both claim host. The next `refresh` by either
/// resolves it.
#[derive(Debug, Clone)]
pub struct RoleState {
    room_id: String,
    user_id: String,
    role: Role,
}

impl RoleState {
    /// Initial state on join is always `Viewer`
    pub fn new(room_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            user_id: user_id.into(),
            role: Role::Viewer,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Join the room: ensure a membership row exists, then claim host if
    /// nobody holds it
    pub async fn join(&mut self, store: &dyn MembershipStore) -> Role {
        if let Err(e) = store.ensure_member(&self.room_id, &self.user_id).await {
            warn!("Failed to record membership in {}: {}", self.room_id, e);
        }
        self.claim_host_if_vacant(store).await
    }

    /// Become host if no member currently holds the role
    pub async fn claim_host_if_vacant(&mut self, store: &dyn MembershipStore) -> Role {
        match store.members(&self.room_id).await {
            Ok(members) if resolve_host(&members).is_none() => {
                info!("Room {} has no host, claiming it", self.room_id);
                if let Err(e) = store.set_role(&self.room_id, &self.user_id, Role::Host).await {
                    warn!("Host claim failed: {}", e);
                }
            }
            Ok(_) => debug!("Room {} already has a host", self.room_id),
            Err(e) => warn!("Membership read failed during claim: {}", e),
        }
        self.refresh(store).await
    }

    /// Hand host to `target`. Only a current host may transfer; for anyone
    /// else this is a no-op returning `Ok(false)`.
    pub async fn transfer_host(
        &mut self,
        store: &dyn MembershipStore,
        target_user_id: &str,
    ) -> Result<bool, MembershipError> {
        if !self.is_host() {
            debug!("Ignoring host transfer from non-host {}", self.user_id);
            return Ok(false);
        }

        store.demote_hosts(&self.room_id).await?;
        store
            .set_role(&self.room_id, target_user_id, Role::Host)
            .await?;
        info!("Transferred host in {} to {}", self.room_id, target_user_id);

        self.refresh(store).await;
        Ok(true)
    }

    /// Re-read the full membership list and derive our role from it.
    ///
    /// If several rows claim host, only the effective one keeps it; a local
    /// loser also demotes its own row. Read failures fall back to viewer.
    pub async fn refresh(&mut self, store: &dyn MembershipStore) -> Role {
        let members = match store.members(&self.room_id).await {
            Ok(members) => members,
            Err(e) => {
                warn!("Membership read failed, assuming viewer: {}", e);
                self.role = Role::Viewer;
                return self.role;
            }
        };

        let own_row = members.iter().find(|m| m.user_id == self.user_id);
        let effective_host = resolve_host(&members).map(|m| m.user_id.as_str());

        self.role = if effective_host == Some(self.user_id.as_str()) {
            Role::Host
        } else {
            if own_row.map(|m| m.role) == Some(Role::Host) {
                info!(
                    "Concurrent host claim in {} resolved in favour of {:?}, stepping down",
                    self.room_id, effective_host
                );
                if let Err(e) = store.set_role(&self.room_id, &self.user_id, Role::Viewer).await {
                    warn!("Failed to demote own membership row: {}", e);
                }
            }
            Role::Viewer
        };
        self.role
    }

    /// Look up our role by `(room, user)` only. Used by contexts that never
    /// write membership. Failures fall back to viewer.
    pub async fn poll(&mut self, store: &dyn MembershipStore) -> Role {
        self.role = match store.role_of(&self.room_id, &self.user_id).await {
            Ok(Some(role)) => role,
            Ok(None) => Role::Viewer,
            Err(e) => {
                debug!("Role lookup failed, falling back to viewer: {}", e);
                Role::Viewer
            }
        };
        self.role
    }
}
