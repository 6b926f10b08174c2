//! Extension-context session startup
//!
//! The extension cannot share the web app's channel or role state. It
//! starts its own room session from whatever the bridge holds: a direct
//! realtime connection, role pulled from the membership table, and a video
//! element probed from the page.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{token, BridgeError, BridgeState};
use crate::adapter::DocumentProbe;
use crate::channel::{RealtimeChannel, RealtimeConfig, SyncChannel};
use crate::config::SyncTiming;
use crate::membership::{MembershipStore, RestMembershipStore};
use crate::session::{AdapterSource, RoomSession, SessionContext, SessionError, SessionObserver};
use crate::sync::{current_time_ms, Platform, RoleMode, SourceRef};

/// What the extension should run, derived from bridge state
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionPlan {
    pub context: SessionContext,
}

impl ExtensionPlan {
    /// `None` unless both records are present, the room is on an external
    /// page, and the token has not expired
    pub fn from_state(state: &BridgeState, timing: SyncTiming) -> Option<Self> {
        let (Some(auth), Some(room)) = (&state.auth, &state.active_room) else {
            debug!("Bridge has no complete session yet");
            return None;
        };
        if room.platform != Platform::External {
            debug!("Room {} plays in the web app, nothing to do", room.room_id);
            return None;
        }
        let now_secs = (current_time_ms() / 1000) as i64;
        let expires_at = auth.expires_at.or_else(|| token::expiry(&auth.access_token));
        if expires_at.is_some_and(|at| at <= now_secs) {
            warn!("Stored access token has expired");
            return None;
        }

        let user_id = token::subject(&auth.access_token).unwrap_or_else(|| auth.user_id.clone());
        Some(Self {
            context: SessionContext {
                room_id: room.room_id.clone(),
                user_id,
                platform: Platform::External,
                source: room.source_url.as_deref().map(SourceRef::url),
                timing,
                role_mode: RoleMode::Poll,
            },
        })
    }
}

/// Join the planned room over the given channel and membership store
pub async fn join_planned(
    plan: ExtensionPlan,
    channel: Arc<dyn SyncChannel>,
    store: Arc<dyn MembershipStore>,
    probe: Arc<dyn DocumentProbe>,
    observer: Arc<dyn SessionObserver>,
) -> Result<RoomSession, SessionError> {
    info!(
        "Starting extension session in room {} as {}",
        plan.context.room_id, plan.context.user_id
    );
    RoomSession::join(plan.context, channel, store, AdapterSource::Probe(probe), observer).await
}

/// Start the extension session from bridge state against the real
/// realtime server and membership table. `Ok(None)` when there is nothing
/// to join.
pub async fn bootstrap(
    state: &BridgeState,
    probe: Arc<dyn DocumentProbe>,
    timing: SyncTiming,
    observer: Arc<dyn SessionObserver>,
) -> Result<Option<RoomSession>, BridgeError> {
    let Some(plan) = ExtensionPlan::from_state(state, timing.clone()) else {
        return Ok(None);
    };
    let Some(auth) = state.auth.as_ref() else {
        return Ok(None);
    };

    let channel = RealtimeChannel::connect(RealtimeConfig::from_auth(auth, timing))
        .map_err(SessionError::from)?;
    let store = RestMembershipStore::from_auth(auth).map_err(SessionError::from)?;

    let session = join_planned(plan, Arc::new(channel), Arc::new(store), probe, observer).await?;
    Ok(Some(session))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    use super::*;
    use crate::adapter::external::tests::{LateProbe, StubElement};
    use crate::bridge::{ActiveRoomContext, AuthContext};
    use crate::channel::LocalHub;
    use crate::membership::InMemoryMembershipStore;
    use crate::session::NoopObserver;
    use crate::sync::{Role, RoleState, SyncEvent};

    fn state(platform: Platform, expires_at: Option<i64>) -> BridgeState {
        let claims = URL_SAFE_NO_PAD.encode(r#"{"sub":"token-user"}"#);
        BridgeState {
            auth: Some(AuthContext {
                access_token: format!("h.{}.s", claims),
                user_id: "stored-user".to_string(),
                realtime_endpoint: "https://project.example.co".to_string(),
                anon_key: "anon".to_string(),
                expires_at,
            }),
            active_room: Some(ActiveRoomContext {
                room_id: "r1".to_string(),
                platform,
                source_url: Some("https://www.netflix.com/watch/80100172".to_string()),
            }),
        }
    }

    #[test]
    fn test_plan_uses_token_subject() {
        let plan = ExtensionPlan::from_state(&state(Platform::External, None), SyncTiming::default()).unwrap();
        assert_eq!(plan.context.user_id, "token-user");
        assert_eq!(plan.context.role_mode, RoleMode::Poll);
        assert_eq!(
            plan.context.source.and_then(|s| s.source_url).as_deref(),
            Some("https://www.netflix.com/watch/80100172")
        );
    }

    #[test]
    fn test_no_plan_for_embedded_or_incomplete() {
        let timing = SyncTiming::default();
        assert!(ExtensionPlan::from_state(&state(Platform::Embeddable, None), timing.clone()).is_none());
        assert!(ExtensionPlan::from_state(&BridgeState::default(), timing.clone()).is_none());
        assert!(ExtensionPlan::from_state(&state(Platform::External, Some(1)), timing).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extension_session_follows_host() {
        let hub = LocalHub::new();
        let store = Arc::new(InMemoryMembershipStore::new());
        RoleState::new("r1", "web-host").join(store.as_ref()).await;

        let element = Arc::new(StubElement::default());
        let probe = Arc::new(LateProbe {
            element: element.clone(),
            appear_after: 0,
            probes: AtomicUsize::new(0),
        });
        let plan = ExtensionPlan::from_state(&state(Platform::External, None), SyncTiming::default()).unwrap();
        let session = join_planned(plan, Arc::new(hub.endpoint()), store.clone(), probe, Arc::new(NoopObserver))
            .await
            .unwrap();
        assert_eq!(session.role(), Role::Viewer);

        let host = hub.endpoint();
        let _rx = host.subscribe("r1", "web-host").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        host.publish("r1", &SyncEvent::seek("web-host", "r1", Platform::External, 640.0, None))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*element.time.lock(), 640.0);
    }
}
