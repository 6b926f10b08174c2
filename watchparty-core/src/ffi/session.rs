//! Session implementation for FFI

use std::sync::{Arc, Once};

use parking_lot::RwLock;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::adapter::{EmbeddedPlayer, EmbeddedPlayerAdapter};
use crate::bridge::{token, AuthContext};
use crate::channel::{ConnectionStatus, RealtimeChannel, RealtimeConfig};
use crate::config::SyncTiming;
use crate::membership::RestMembershipStore;
use crate::session::{AdapterSource, RoomSession, SessionContext, SessionError, SessionObserver};
use crate::sync::{Platform, PresenceSet, Role, RoleMode, SourceRef};

use super::types::*;

static TRACING_INIT: Once = Once::new();

type SharedCallback = Arc<RwLock<Option<Arc<dyn SessionCallback>>>>;

/// The app's player seen through the embedded player trait
struct ForeignPlayer(Box<dyn PlayerCallback>);

impl EmbeddedPlayer for ForeignPlayer {
    fn current_time(&self) -> f64 {
        self.0.current_time()
    }

    fn play(&self) {
        self.0.play();
    }

    fn pause(&self) {
        self.0.pause();
    }

    fn seek_to(&self, seconds: f64) {
        self.0.seek_to(seconds);
    }

    fn cue_video(&self, content_id: &str) {
        self.0.cue_video(content_id.to_string());
    }
}

/// Forwards session notifications to whatever callback is set
struct CallbackObserver {
    callback: SharedCallback,
}

impl CallbackObserver {
    fn with(&self, f: impl FnOnce(&dyn SessionCallback)) {
        if let Some(cb) = self.callback.read().as_ref() {
            f(cb.as_ref());
        }
    }
}

impl SessionObserver for CallbackObserver {
    fn on_role_changed(&self, role: Role) {
        self.with(|cb| cb.on_role_changed(role.into()));
    }

    fn on_presence_changed(&self, presence: &PresenceSet) {
        self.with(|cb| cb.on_participants_changed(presence.iter().cloned().collect()));
    }

    fn on_connection_changed(&self, status: ConnectionStatus) {
        self.with(|cb| cb.on_connection_changed(status.into()));
    }

    fn on_content_changed(&self, source: &SourceRef) {
        self.with(|cb| cb.on_content_changed(ContentInfo::from(source)));
    }
}

struct ActiveRoom {
    session: RoomSession,
    player: Arc<EmbeddedPlayerAdapter>,
}

/// Main session interface
#[derive(uniffi::Object)]
pub struct Session {
    runtime: Runtime,
    timing: SyncTiming,
    auth: RwLock<Option<AuthContext>>,
    callback: SharedCallback,
    room: RwLock<Option<ActiveRoom>>,
}

#[uniffi::export]
impl Session {
    /// Create a new session
    #[uniffi::constructor]
    pub fn new() -> Result<Self, CoreError> {
        TRACING_INIT.call_once(|| {
            let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("watchparty_core=debug,reqwest=off,hyper=off,hyper_util=off")
            });
            let _ = tracing_subscriber::fmt()
                .with_ansi(false)
                .with_target(false)
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        });

        info!("Initializing watchparty-core session");

        let runtime = Runtime::new().map_err(|e| CoreError::RuntimeError(e.to_string()))?;

        Ok(Self {
            runtime,
            timing: SyncTiming::default(),
            auth: RwLock::new(None),
            callback: Arc::new(RwLock::new(None)),
            room: RwLock::new(None),
        })
    }

    /// Set the event callback
    pub fn set_callback(&self, callback: Box<dyn SessionCallback>) {
        *self.callback.write() = Some(Arc::from(callback));
    }

    /// Set or clear the signed-in user
    pub fn set_auth(&self, auth: Option<AuthInfo>) {
        debug!("Auth {}", if auth.is_some() { "set" } else { "cleared" });
        *self.auth.write() = auth.map(AuthContext::from);
    }

    /// Join a room with the app's embedded player. `source` is the room's
    /// video link or id, if known.
    pub fn join_room(
        &self,
        room_id: String,
        source: Option<String>,
        player: Box<dyn PlayerCallback>,
    ) -> Result<(), CoreError> {
        if self.room.read().is_some() {
            return Err(CoreError::AlreadyInRoom);
        }
        let auth = self.auth.read().clone().ok_or(CoreError::NotAuthenticated)?;

        let source = source.as_deref().map(SourceRef::from_room_source);
        let user_id = token::subject(&auth.access_token).unwrap_or_else(|| auth.user_id.clone());
        let player = Arc::new(EmbeddedPlayerAdapter::new(
            Arc::new(ForeignPlayer(player)),
            source.as_ref().and_then(|s| s.content_id.clone()),
        ));

        let ctx = SessionContext {
            room_id: room_id.clone(),
            user_id,
            platform: Platform::Embeddable,
            source,
            timing: self.timing.clone(),
            role_mode: RoleMode::Claim,
        };
        let observer = Arc::new(CallbackObserver {
            callback: Arc::clone(&self.callback),
        });

        let result = self.runtime.block_on(async {
            let channel = RealtimeChannel::connect(RealtimeConfig::from_auth(&auth, self.timing.clone()))?;
            let store = RestMembershipStore::from_auth(&auth)?;
            RoomSession::join(
                ctx,
                Arc::new(channel),
                Arc::new(store),
                AdapterSource::Ready(player.clone()),
                observer,
            )
            .await
        });

        let session = match result {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to join room {}: {}", room_id, e);
                self.report_error(&e);
                return Err(e.into());
            }
        };

        info!("Joined room {} as {}", room_id, session.role());
        *self.room.write() = Some(ActiveRoom { session, player });
        Ok(())
    }

    /// Leave the current room
    pub fn leave_room(&self) -> Result<(), CoreError> {
        let room = self.room.write().take().ok_or(CoreError::NotInRoom)?;
        self.runtime.block_on(room.session.leave());
        Ok(())
    }

    /// Hand host to another member. Returns false if we are not host.
    pub fn transfer_host(&self, user_id: String) -> Result<bool, CoreError> {
        let room = self.room.read();
        let room = room.as_ref().ok_or(CoreError::NotInRoom)?;
        let transferred = self
            .runtime
            .block_on(room.session.transfer_host(&user_id))
            .map_err(|e| {
                self.report_error(&e);
                CoreError::from(e)
            })?;
        Ok(transferred)
    }

    /// The embedded player finished loading
    pub fn player_ready(&self) {
        if let Some(room) = self.room.read().as_ref() {
            room.player.notify_ready();
        }
    }

    /// The embedded player reported a state code
    pub fn player_state_changed(&self, code: i32) {
        if let Some(room) = self.room.read().as_ref() {
            room.player.notify_state(code);
        }
    }

    /// Current room status, if in a room
    pub fn room_status(&self) -> Option<RoomStatus> {
        let room = self.room.read();
        let session = &room.as_ref()?.session;
        Some(RoomStatus::new(
            session.status(),
            session.user_id(),
            &session.presence(),
            session.source().as_ref(),
        ))
    }

    /// Check if we are the host
    pub fn is_host(&self) -> bool {
        self.room
            .read()
            .as_ref()
            .map(|room| room.session.is_host())
            .unwrap_or(false)
    }

    /// Check if we are in a room
    pub fn is_in_room(&self) -> bool {
        self.room.read().is_some()
    }
}

impl Session {
    fn report_error(&self, e: &SessionError) {
        if let Some(cb) = self.callback.read().as_ref() {
            cb.on_error(e.to_string());
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(room) = self.room.get_mut().take() {
            self.runtime.block_on(room.session.leave());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SilentPlayer;

    impl PlayerCallback for SilentPlayer {
        fn current_time(&self) -> f64 {
            0.0
        }
        fn play(&self) {}
        fn pause(&self) {}
        fn seek_to(&self, _seconds: f64) {}
        fn cue_video(&self, _content_id: String) {}
    }

    #[test]
    fn test_join_requires_auth() {
        let session = Session::new().unwrap();
        let result = session.join_room("r1".to_string(), None, Box::new(SilentPlayer));
        assert!(matches!(result, Err(CoreError::NotAuthenticated)));
        assert!(!session.is_in_room());
    }

    #[test]
    fn test_idle_session() {
        let session = Session::new().unwrap();
        assert!(session.room_status().is_none());
        assert!(!session.is_host());
        assert!(matches!(session.leave_room(), Err(CoreError::NotInRoom)));
        assert!(matches!(
            session.transfer_host("u2".to_string()),
            Err(CoreError::NotInRoom)
        ));

        // Player notifications outside a room are ignored
        session.player_ready();
        session.player_state_changed(1);
    }

    #[test]
    fn test_foreign_player_forwards_cue() {
        use parking_lot::Mutex;

        #[derive(Default)]
        struct Recorder(Mutex<Vec<String>>);
        struct Cueing(Arc<Recorder>);
        impl PlayerCallback for Cueing {
            fn current_time(&self) -> f64 {
                12.5
            }
            fn play(&self) {}
            fn pause(&self) {}
            fn seek_to(&self, _seconds: f64) {}
            fn cue_video(&self, content_id: String) {
                self.0 .0.lock().push(content_id);
            }
        }

        let recorder = Arc::new(Recorder::default());
        let player = ForeignPlayer(Box::new(Cueing(recorder.clone())));
        player.cue_video("abc123");
        assert_eq!(player.current_time(), 12.5);
        assert_eq!(*recorder.0.lock(), vec!["abc123".to_string()]);
    }
}
