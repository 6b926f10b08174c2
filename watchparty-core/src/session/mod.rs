//! Room session
//!
//! One [`RoomSession`] per joined room per execution context. It owns the
//! role state, presence, echo and seek state and every periodic task for
//! the room; dropping or leaving the session tears all of it down.

mod tasks;

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

use crate::adapter::{DocumentProbe, PlaybackAdapter, PlayerSignal};
use crate::channel::{ChannelError, ChannelEvent, ConnectionStatus, SyncChannel};
use crate::config::SyncTiming;
use crate::drift::DriftCorrector;
use crate::echo::EchoSuppressor;
use crate::membership::{MembershipError, MembershipStore};
use crate::seek_debouncer::SeekDebouncer;
use crate::sync::{EventKind, Platform, PresenceSet, Role, RoleMode, RoleState, SourceRef, SyncEvent};

/// Session-related errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Membership error: {0}")]
    Membership(#[from] MembershipError),
}

/// Everything a session needs to know about where it runs
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub room_id: String,
    pub user_id: String,
    pub platform: Platform,
    /// Content the room was opened with, if known
    pub source: Option<SourceRef>,
    pub timing: SyncTiming,
    pub role_mode: RoleMode,
}

/// Where the session gets its player from
pub enum AdapterSource {
    /// The player exists already
    Ready(Arc<dyn PlaybackAdapter>),
    /// Keep probing the document until a video element appears
    Probe(Arc<dyn DocumentProbe>),
}

/// Notifications about session state, for a UI or a foreign host app
pub trait SessionObserver: Send + Sync {
    fn on_role_changed(&self, _role: Role) {}
    fn on_presence_changed(&self, _presence: &PresenceSet) {}
    fn on_connection_changed(&self, _status: ConnectionStatus) {}
    fn on_content_changed(&self, _source: &SourceRef) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Snapshot of the status indicator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub room_id: String,
    pub role: Role,
    pub connection: ConnectionStatus,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connection = if self.connection.is_connected() {
            "Connected"
        } else {
            "Disconnected"
        };
        write!(f, "{} | Room {} | {}", connection, self.room_id, self.role)
    }
}

/// State shared between the session handle and its tasks
pub(crate) struct Shared {
    ctx: SessionContext,
    channel: Arc<dyn SyncChannel>,
    store: Arc<dyn MembershipStore>,
    observer: Arc<dyn SessionObserver>,
    /// Held across membership store calls
    role_state: tokio::sync::Mutex<RoleState>,
    /// Last known role, readable without awaiting
    role: RwLock<Role>,
    adapter: RwLock<Option<Arc<dyn PlaybackAdapter>>>,
    signals: mpsc::UnboundedSender<PlayerSignal>,
    drift: DriftCorrector,
    echo: Mutex<EchoSuppressor>,
    seek: Mutex<SeekDebouncer>,
    seek_wake: Notify,
    source: RwLock<Option<SourceRef>>,
    presence: RwLock<PresenceSet>,
    connection: RwLock<ConnectionStatus>,
    tasks: tasks::TaskSet,
}

impl Shared {
    fn is_host(&self) -> bool {
        *self.role.read() == Role::Host
    }

    fn adapter(&self) -> Option<Arc<dyn PlaybackAdapter>> {
        self.adapter.read().clone()
    }

    fn position(&self) -> Option<f64> {
        let adapter = self.adapter()?;
        match adapter.current_time() {
            Ok(position) => Some(position),
            Err(e) => {
                trace!("Position unavailable: {}", e);
                None
            }
        }
    }

    fn set_role(&self, role: Role) {
        let previous = std::mem::replace(&mut *self.role.write(), role);
        if previous == role {
            return;
        }
        info!("Now {} in room {}", role, self.ctx.room_id);
        if role == Role::Viewer {
            self.seek.lock().reset();
        }
        self.observer.on_role_changed(role);
    }

    fn install_adapter(&self, adapter: Arc<dyn PlaybackAdapter>) {
        if let Some(forwarder) = adapter.listen(self.signals.clone()) {
            self.tasks.push(forwarder);
        }
        *self.adapter.write() = Some(adapter);
        debug!("Player attached to room {}", self.ctx.room_id);
    }

    fn publish(&self, event: SyncEvent) {
        trace!("Publishing {:?}", event.kind());
        if let Err(e) = self.channel.publish(&self.ctx.room_id, &event) {
            debug!("Publish of {:?} failed: {}", event.kind(), e);
        }
    }

    /// Emit SET_SOURCE for the current content, if any is known
    fn publish_source(&self) {
        let Some(source) = self.source.read().clone() else {
            return;
        };
        if source.is_empty() {
            return;
        }
        let event = SyncEvent::set_source(
            &self.ctx.user_id,
            &self.ctx.room_id,
            self.ctx.platform,
            &source,
            self.position(),
        );
        self.publish(event);
    }

    fn publish_position(&self, kind: EventKind) {
        let Some(position) = self.position() else {
            return;
        };
        let source = self.source.read().clone();
        let (sender, room, platform) = (&self.ctx.user_id, &self.ctx.room_id, self.ctx.platform);
        let event = match kind {
            EventKind::Play => SyncEvent::play(sender, room, platform, position, source.as_ref()),
            EventKind::Pause => SyncEvent::pause(sender, room, platform, position, source.as_ref()),
            EventKind::Seek => SyncEvent::seek(sender, room, platform, position, source.as_ref()),
            EventKind::Ping => SyncEvent::ping(sender, room, platform, position, source.as_ref()),
            EventKind::SetSource => return self.publish_source(),
        };
        self.publish(event);
    }

    /// React to a local player notification
    fn handle_local_signal(&self, signal: PlayerSignal) {
        if !self.is_host() {
            trace!("Viewer ignoring local {:?}", signal);
            return;
        }

        let now = Instant::now();
        match signal {
            PlayerSignal::Ready => self.publish_source(),
            PlayerSignal::Playing | PlayerSignal::Paused | PlayerSignal::Seeking
                if self.echo.lock().is_suppressed(now) =>
            {
                debug!("Suppressed echo of {:?}", signal);
            }
            PlayerSignal::Playing => self.publish_position(EventKind::Play),
            PlayerSignal::Paused => self.publish_position(EventKind::Pause),
            PlayerSignal::Seeking => {
                if let Some(position) = self.position() {
                    self.seek.lock().sample(position, now);
                    self.seek_wake.notify_one();
                }
            }
            PlayerSignal::Buffering | PlayerSignal::Ended => trace!("Local {:?}", signal),
        }
    }

    /// Record new content announced by the host and load it
    fn adopt_source(&self, source: SourceRef) {
        if source.is_empty() {
            return;
        }
        {
            let mut current = self.source.write();
            if current.as_ref() == Some(&source) {
                return;
            }
            *current = Some(source.clone());
        }
        info!("Room {} content is now {:?}", self.ctx.room_id, source.content_id);
        self.observer.on_content_changed(&source);
        if let Some(adapter) = self.adapter() {
            if let Err(e) = adapter.cue(&source) {
                warn!("Failed to load new content: {}", e);
            }
        }
    }

    /// Apply an event received from the room
    fn apply_remote(&self, event: SyncEvent) {
        if event.sender_id() == self.ctx.user_id
            || event.room_id() != self.ctx.room_id
            || event.payload().platform != self.ctx.platform
        {
            trace!("Filtered inbound {:?} from {}", event.kind(), event.sender_id());
            return;
        }

        // Local notifications inside the window are echoes, host or not
        self.echo.lock().arm(Instant::now());

        if self.is_host() {
            trace!("Host ignoring inbound {:?}", event.kind());
            return;
        }

        let content_changed = event.payload().source().filter(|incoming| {
            let current = self.source.read();
            match (&incoming.content_id, current.as_ref()) {
                (Some(id), Some(known)) => known.content_id.as_ref() != Some(id),
                (Some(_), None) => true,
                (None, _) => false,
            }
        });
        match (event.kind(), event.payload().source()) {
            (EventKind::SetSource, Some(source)) => self.adopt_source(source),
            _ => {
                if let Some(source) = content_changed {
                    self.adopt_source(source);
                }
            }
        }

        let Some(adapter) = self.adapter() else {
            debug!("No player yet, skipping playback effect of {:?}", event.kind());
            return;
        };

        if let Some(remote) = event.video_time() {
            match adapter.current_time() {
                Ok(local) => {
                    if let Some(target) = self.drift.correction(remote, local) {
                        debug!("Drift {:.2}s, seeking to {:.2}", remote - local, target);
                        if let Err(e) = adapter.seek_to(target) {
                            warn!("Correction seek failed: {}", e);
                        }
                    }
                }
                Err(e) => debug!("Cannot read position for drift check: {}", e),
            }
        }

        let result = match event.kind() {
            EventKind::Play => adapter.play(),
            EventKind::Pause => adapter.pause(),
            EventKind::Seek | EventKind::SetSource | EventKind::Ping => Ok(()),
        };
        if let Err(e) = result {
            warn!("Failed to apply {:?}: {}", event.kind(), e);
        }
    }

    async fn on_presence(&self, presence: PresenceSet) {
        let previous = std::mem::replace(&mut *self.presence.write(), presence.clone());
        self.observer.on_presence_changed(&presence);

        if self.ctx.role_mode == RoleMode::Claim {
            self.refresh_role().await;
        }

        let newcomers: Vec<String> = presence
            .joined_since(&previous)
            .into_iter()
            .filter(|user| *user != self.ctx.user_id)
            .collect();
        if self.is_host() && !newcomers.is_empty() {
            debug!("{:?} joined, re-sending source", newcomers);
            self.publish_source();
        }
    }

    fn on_status(&self, status: ConnectionStatus) {
        let previous = std::mem::replace(&mut *self.connection.write(), status);
        if previous == status {
            return;
        }
        info!("Room {} transport {}", self.ctx.room_id, status);
        self.observer.on_connection_changed(status);
        // Nothing is replayed after a reconnect
        if status.is_connected() && previous == ConnectionStatus::Disconnected && self.is_host() {
            self.publish_source();
        }
    }

    fn handle_channel_event(&self, event: ChannelEvent) -> Option<PresenceSet> {
        match event {
            ChannelEvent::Sync(event) => self.apply_remote(event),
            ChannelEvent::Presence(presence) => return Some(presence),
            ChannelEvent::Status(status) => self.on_status(status),
        }
        None
    }

    async fn refresh_role(&self) -> Role {
        let mut state = self.role_state.lock().await;
        let role = state.refresh(self.store.as_ref()).await;
        self.set_role(role);
        role
    }

    async fn poll_role(&self) -> Role {
        let mut state = self.role_state.lock().await;
        let role = state.poll(self.store.as_ref()).await;
        self.set_role(role);
        role
    }
}

/// Handle to a joined room
pub struct RoomSession {
    shared: Arc<Shared>,
    left: bool,
}

impl RoomSession {
    /// Join a room: resolve the role, subscribe, track presence, and start
    /// the room's tasks
    #[instrument(skip_all, fields(room = %ctx.room_id, user = %ctx.user_id))]
    pub async fn join(
        ctx: SessionContext,
        channel: Arc<dyn SyncChannel>,
        store: Arc<dyn MembershipStore>,
        adapter: AdapterSource,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self, SessionError> {
        let mut role_state = RoleState::new(&ctx.room_id, &ctx.user_id);
        let role = match ctx.role_mode {
            RoleMode::Claim => role_state.join(store.as_ref()).await,
            RoleMode::Poll => role_state.poll(store.as_ref()).await,
        };

        let events = channel.subscribe(&ctx.room_id, &ctx.user_id).await?;
        channel.track_presence(&ctx.room_id, &ctx.user_id).await?;

        let (signals, signal_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            drift: DriftCorrector::new(ctx.timing.drift_threshold_secs),
            echo: Mutex::new(EchoSuppressor::new(ctx.timing.echo_window(ctx.platform))),
            seek: Mutex::new(SeekDebouncer::new(
                ctx.timing.seek_debounce(),
                ctx.timing.seek_poll_interval(),
            )),
            seek_wake: Notify::new(),
            source: RwLock::new(ctx.source.clone()),
            presence: RwLock::new(PresenceSet::new()),
            connection: RwLock::new(ConnectionStatus::Connecting),
            tasks: tasks::TaskSet::default(),
            role_state: tokio::sync::Mutex::new(role_state),
            role: RwLock::new(Role::Viewer),
            adapter: RwLock::new(None),
            signals,
            ctx,
            channel,
            store,
            observer,
        });
        shared.set_role(role);

        match adapter {
            AdapterSource::Ready(adapter) => shared.install_adapter(adapter),
            AdapterSource::Probe(probe) => {
                shared.tasks.push(tokio::spawn(tasks::acquire_adapter(shared.clone(), probe)));
            }
        }

        let owned = &shared.tasks;
        owned.push(tokio::spawn(tasks::inbound_pump(shared.clone(), events)));
        owned.push(tokio::spawn(tasks::signal_pump(shared.clone(), signal_rx)));
        owned.push(tokio::spawn(tasks::heartbeat_loop(shared.clone())));
        owned.push(tokio::spawn(tasks::seek_loop(shared.clone())));
        if shared.ctx.role_mode == RoleMode::Poll {
            owned.push(tokio::spawn(tasks::role_poll_loop(shared.clone())));
        }

        info!("Joined room {} as {}", shared.ctx.room_id, role);
        Ok(Self { shared, left: false })
    }

    pub fn room_id(&self) -> &str {
        &self.shared.ctx.room_id
    }

    pub fn user_id(&self) -> &str {
        &self.shared.ctx.user_id
    }

    pub fn platform(&self) -> Platform {
        self.shared.ctx.platform
    }

    pub fn role(&self) -> Role {
        *self.shared.role.read()
    }

    pub fn is_host(&self) -> bool {
        self.shared.is_host()
    }

    pub fn presence(&self) -> PresenceSet {
        self.shared.presence.read().clone()
    }

    /// Content currently known to be playing in the room
    pub fn source(&self) -> Option<SourceRef> {
        self.shared.source.read().clone()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            room_id: self.shared.ctx.room_id.clone(),
            role: self.role(),
            connection: *self.shared.connection.read(),
        }
    }

    /// Switch content as host and announce it
    pub fn set_source(&self, source: SourceRef) {
        *self.shared.source.write() = Some(source);
        if self.is_host() {
            self.shared.publish_source();
        }
    }

    /// Hand host to another member. Returns `Ok(false)` if we are not host.
    pub async fn transfer_host(&self, target_user_id: &str) -> Result<bool, SessionError> {
        let mut state = self.shared.role_state.lock().await;
        let transferred = state
            .transfer_host(self.shared.store.as_ref(), target_user_id)
            .await?;
        self.shared.set_role(state.role());
        Ok(transferred)
    }

    /// Re-read membership now
    pub async fn refresh_role(&self) -> Role {
        match self.shared.ctx.role_mode {
            RoleMode::Claim => self.shared.refresh_role().await,
            RoleMode::Poll => self.shared.poll_role().await,
        }
    }

    /// Stop every room task, unsubscribe, and release presence
    pub async fn leave(mut self) {
        self.shared.tasks.abort_all();
        self.left = true;
        self.shared.channel.unsubscribe(&self.shared.ctx.room_id).await;
        info!("Left room {}", self.shared.ctx.room_id);
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.shared.tasks.abort_all();
        if self.left {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let channel = self.shared.channel.clone();
            let room_id = self.shared.ctx.room_id.clone();
            handle.spawn(async move { channel.unsubscribe(&room_id).await });
        }
    }
}
