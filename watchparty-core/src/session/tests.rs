use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use super::*;
use crate::adapter::external::tests::{LateProbe, StubElement};
use crate::adapter::fake::{FakePlayer, PlayerCall};
use crate::channel::{LocalChannel, LocalHub};
use crate::membership::InMemoryMembershipStore;

const ROOM: &str = "room";

fn context(user: &str, platform: Platform, role_mode: RoleMode) -> SessionContext {
    SessionContext {
        room_id: ROOM.to_string(),
        user_id: user.to_string(),
        platform,
        source: None,
        timing: SyncTiming::default(),
        role_mode,
    }
}

/// Let spawned tasks drain their queues
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn join(
    hub: &LocalHub,
    store: &Arc<InMemoryMembershipStore>,
    ctx: SessionContext,
    player: &Arc<FakePlayer>,
) -> RoomSession {
    let session = RoomSession::join(
        ctx,
        Arc::new(hub.endpoint()),
        store.clone(),
        AdapterSource::Ready(player.clone()),
        Arc::new(NoopObserver),
    )
    .await
    .unwrap();
    settle().await;
    session
}

/// Untracked listener on the room that records what gets published
async fn spy(hub: &LocalHub) -> (LocalChannel, mpsc::UnboundedReceiver<ChannelEvent>) {
    let channel = hub.endpoint();
    let rx = channel.subscribe(ROOM, "spy").await.unwrap();
    (channel, rx)
}

fn published(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ChannelEvent::Sync(event) = event {
            events.push(event);
        }
    }
    events
}

fn of_kind(events: &[SyncEvent], kind: EventKind) -> Vec<SyncEvent> {
    events.iter().filter(|e| e.kind() == kind).cloned().collect()
}

async fn store_with_host(host: &str) -> Arc<InMemoryMembershipStore> {
    let store = Arc::new(InMemoryMembershipStore::new());
    RoleState::new(ROOM, host).join(store.as_ref()).await;
    store
}

#[derive(Default)]
struct RecordingObserver {
    roles: Mutex<Vec<Role>>,
    contents: Mutex<Vec<SourceRef>>,
    connections: Mutex<Vec<ConnectionStatus>>,
}

impl SessionObserver for RecordingObserver {
    fn on_role_changed(&self, role: Role) {
        self.roles.lock().push(role);
    }
    fn on_connection_changed(&self, status: ConnectionStatus) {
        self.connections.lock().push(status);
    }
    fn on_content_changed(&self, source: &SourceRef) {
        self.contents.lock().push(source.clone());
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_joiner_hosts() {
    let hub = LocalHub::new();
    let store = Arc::new(InMemoryMembershipStore::new());
    let alice_player = Arc::new(FakePlayer::at(0.0));
    let bob_player = Arc::new(FakePlayer::at(0.0));

    let alice = join(&hub, &store, context("alice", Platform::Embeddable, RoleMode::Claim), &alice_player).await;
    let bob = join(&hub, &store, context("bob", Platform::Embeddable, RoleMode::Claim), &bob_player).await;

    assert!(alice.is_host());
    assert_eq!(bob.role(), Role::Viewer);
    assert_eq!(alice.presence().len(), 2);
    assert_eq!(alice.status().to_string(), "Connected | Room room | host");
    assert_eq!(bob.status().to_string(), "Connected | Room room | viewer");
}

#[tokio::test(start_paused = true)]
async fn test_ping_corrects_drift_above_threshold_only() {
    let hub = LocalHub::new();
    let store = store_with_host("alice").await;
    let player = Arc::new(FakePlayer::at(118.0));
    let _bob = join(&hub, &store, context("bob", Platform::Embeddable, RoleMode::Claim), &player).await;
    let (host, _rx) = spy(&hub).await;

    let ping = SyncEvent::ping("alice", ROOM, Platform::Embeddable, 120.0, None);
    host.publish(ROOM, &ping).unwrap();
    settle().await;
    assert_eq!(player.calls(), vec![PlayerCall::Seek(120.0)]);

    // 0.5s behind stays put, and PING never touches play state
    player.clear_calls();
    player.set_position(119.5);
    host.publish(ROOM, &ping).unwrap();
    settle().await;
    assert!(player.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_viewer_applies_play_and_pause() {
    let hub = LocalHub::new();
    let store = store_with_host("alice").await;
    let player = Arc::new(FakePlayer::at(50.2));
    let bob = join(&hub, &store, context("bob", Platform::External, RoleMode::Claim), &player).await;
    let (host, _rx) = spy(&hub).await;

    host.publish(ROOM, &SyncEvent::play("alice", ROOM, Platform::External, 50.0, None))
        .unwrap();
    settle().await;
    assert_eq!(player.calls(), vec![PlayerCall::Play]);
    assert!(bob.shared.echo.lock().is_suppressed(Instant::now()));

    player.clear_calls();
    host.publish(ROOM, &SyncEvent::pause("alice", ROOM, Platform::External, 80.0, None))
        .unwrap();
    settle().await;
    assert_eq!(player.calls(), vec![PlayerCall::Seek(80.0), PlayerCall::Pause]);
}

#[tokio::test(start_paused = true)]
async fn test_viewer_filters_foreign_events() {
    let hub = LocalHub::new();
    let store = store_with_host("alice").await;
    let player = Arc::new(FakePlayer::at(0.0));
    let _bob = join(&hub, &store, context("bob", Platform::Embeddable, RoleMode::Claim), &player).await;
    let (host, _rx) = spy(&hub).await;

    // Own sender id, other platform, other room
    host.publish(ROOM, &SyncEvent::play("bob", ROOM, Platform::Embeddable, 30.0, None))
        .unwrap();
    host.publish(ROOM, &SyncEvent::play("alice", ROOM, Platform::External, 30.0, None))
        .unwrap();
    host.publish(ROOM, &SyncEvent::play("alice", "elsewhere", Platform::Embeddable, 30.0, None))
        .unwrap();
    settle().await;

    assert!(player.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_host_ignores_inbound_events() {
    let hub = LocalHub::new();
    let store = Arc::new(InMemoryMembershipStore::new());
    let player = Arc::new(FakePlayer::at(10.0));
    let alice = join(&hub, &store, context("alice", Platform::Embeddable, RoleMode::Claim), &player).await;
    assert!(alice.is_host());
    let (other, _rx) = spy(&hub).await;

    other
        .publish(ROOM, &SyncEvent::seek("mallory", ROOM, Platform::Embeddable, 99.0, None))
        .unwrap();
    settle().await;
    assert!(player.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_host_heartbeat_pings() {
    let hub = LocalHub::new();
    let store = Arc::new(InMemoryMembershipStore::new());
    let (_spy, mut rx) = spy(&hub).await;
    let player = Arc::new(FakePlayer::at(42.0));
    let _alice = join(&hub, &store, context("alice", Platform::Embeddable, RoleMode::Claim), &player).await;

    tokio::time::sleep(Duration::from_millis(3_050)).await;

    let pings = of_kind(&published(&mut rx), EventKind::Ping);
    assert_eq!(pings.len(), 1);
    assert_eq!(pings[0].video_time(), Some(42.0));
    assert_eq!(pings[0].sender_id(), "alice");
    assert_eq!(pings[0].payload().platform, Platform::Embeddable);
}

#[tokio::test(start_paused = true)]
async fn test_rapid_seeks_collapse_to_one() {
    let hub = LocalHub::new();
    let store = Arc::new(InMemoryMembershipStore::new());
    let (_spy, mut rx) = spy(&hub).await;
    let player = Arc::new(FakePlayer::at(10.0));
    let _alice = join(&hub, &store, context("alice", Platform::External, RoleMode::Claim), &player).await;

    for position in [20.0, 30.0, 45.0] {
        player.set_position(position);
        player.emit(PlayerSignal::Seeking);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(4_700)).await;

    let seeks = of_kind(&published(&mut rx), EventKind::Seek);
    assert_eq!(seeks.len(), 1);
    assert_eq!(seeks[0].video_time(), Some(45.0));
}

#[tokio::test(start_paused = true)]
async fn test_inbound_event_opens_echo_window_for_host() {
    let hub = LocalHub::new();
    let store = Arc::new(InMemoryMembershipStore::new());
    let (other, mut rx) = spy(&hub).await;
    let player = Arc::new(FakePlayer::at(5.0));
    let alice = join(&hub, &store, context("alice", Platform::Embeddable, RoleMode::Claim), &player).await;
    assert!(alice.is_host());

    // A stale host still broadcasting; its PLAY reaches our player as a local change
    other
        .publish(ROOM, &SyncEvent::play("bob", ROOM, Platform::Embeddable, 5.0, None))
        .unwrap();
    settle().await;
    player.emit(PlayerSignal::Playing);
    settle().await;
    assert!(of_kind(&published(&mut rx), EventKind::Play).is_empty());
    assert!(player.calls().is_empty());

    // Embedded window is 150ms
    tokio::time::sleep(Duration::from_millis(200)).await;
    player.emit(PlayerSignal::Playing);
    settle().await;
    let plays = of_kind(&published(&mut rx), EventKind::Play);
    assert_eq!(plays.len(), 1);
    assert_eq!(plays[0].sender_id(), "alice");
    assert_eq!(plays[0].video_time(), Some(5.0));
}

#[tokio::test(start_paused = true)]
async fn test_filtered_event_leaves_echo_window_closed() {
    let hub = LocalHub::new();
    let store = Arc::new(InMemoryMembershipStore::new());
    let (other, mut rx) = spy(&hub).await;
    let player = Arc::new(FakePlayer::at(5.0));
    let _alice = join(&hub, &store, context("alice", Platform::Embeddable, RoleMode::Claim), &player).await;

    // Other platform never arms the window
    other
        .publish(ROOM, &SyncEvent::pause("bob", ROOM, Platform::External, 5.0, None))
        .unwrap();
    settle().await;
    player.emit(PlayerSignal::Paused);
    settle().await;
    assert_eq!(of_kind(&published(&mut rx), EventKind::Pause).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_joiner_receives_source() {
    let hub = LocalHub::new();
    let store = Arc::new(InMemoryMembershipStore::new());
    let (_spy, mut rx) = spy(&hub).await;

    let mut ctx = context("alice", Platform::Embeddable, RoleMode::Claim);
    ctx.source = Some(SourceRef::content("abc123"));
    let alice_player = Arc::new(FakePlayer::at(0.0));
    let alice = join(&hub, &store, ctx, &alice_player).await;
    assert!(alice.is_host());

    alice_player.emit(PlayerSignal::Ready);
    settle().await;
    let announced = of_kind(&published(&mut rx), EventKind::SetSource);
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0].payload().content_id.as_deref(), Some("abc123"));

    let observer = Arc::new(RecordingObserver::default());
    let bob_player = Arc::new(FakePlayer::at(0.0));
    let bob = RoomSession::join(
        context("bob", Platform::Embeddable, RoleMode::Claim),
        Arc::new(hub.endpoint()),
        store.clone(),
        AdapterSource::Ready(bob_player.clone()),
        observer.clone(),
    )
    .await
    .unwrap();
    settle().await;

    assert_eq!(bob.source().and_then(|s| s.content_id).as_deref(), Some("abc123"));
    assert_eq!(bob_player.calls(), vec![PlayerCall::Cue(Some("abc123".to_string()))]);
    assert_eq!(observer.contents.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ping_with_new_content_is_adopted() {
    let hub = LocalHub::new();
    let store = store_with_host("alice").await;
    let player = Arc::new(FakePlayer::at(12.0));
    let bob = join(&hub, &store, context("bob", Platform::Embeddable, RoleMode::Claim), &player).await;
    let (host, _rx) = spy(&hub).await;

    let source = SourceRef::content("dQw4w9WgXcQ");
    host.publish(ROOM, &SyncEvent::ping("alice", ROOM, Platform::Embeddable, 12.2, Some(&source)))
        .unwrap();
    settle().await;

    assert_eq!(bob.source(), Some(source));
    assert_eq!(player.calls(), vec![PlayerCall::Cue(Some("dQw4w9WgXcQ".to_string()))]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_role_poll_stays_viewer() {
    let hub = LocalHub::new();
    let store = store_with_host("alice").await;
    store.set_unavailable(true);
    let (_spy, mut rx) = spy(&hub).await;

    let player = Arc::new(FakePlayer::at(33.0));
    let ext = join(&hub, &store, context("alice", Platform::External, RoleMode::Poll), &player).await;
    assert_eq!(ext.role(), Role::Viewer);

    player.emit(PlayerSignal::Playing);
    player.emit(PlayerSignal::Seeking);
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert_eq!(ext.role(), Role::Viewer);
    assert!(published(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_role_poll_picks_up_promotion() {
    let hub = LocalHub::new();
    let store = store_with_host("alice").await;
    store.ensure_member(ROOM, "bob").await.unwrap();
    let (_spy, mut rx) = spy(&hub).await;

    let observer = Arc::new(RecordingObserver::default());
    let player = Arc::new(FakePlayer::at(7.0));
    let ext = RoomSession::join(
        context("bob", Platform::External, RoleMode::Poll),
        Arc::new(hub.endpoint()),
        store.clone(),
        AdapterSource::Ready(player.clone()),
        observer.clone(),
    )
    .await
    .unwrap();
    assert_eq!(ext.role(), Role::Viewer);

    store.demote_hosts(ROOM).await.unwrap();
    store.set_role(ROOM, "bob", Role::Host).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5_100)).await;

    assert!(ext.is_host());
    assert_eq!(*observer.roles.lock(), vec![Role::Host]);

    // Pings only start once host
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!of_kind(&published(&mut rx), EventKind::Ping).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transfer_host() {
    let hub = LocalHub::new();
    let store = Arc::new(InMemoryMembershipStore::new());
    let alice_player = Arc::new(FakePlayer::at(0.0));
    let bob_player = Arc::new(FakePlayer::at(0.0));
    let alice = join(&hub, &store, context("alice", Platform::Embeddable, RoleMode::Claim), &alice_player).await;
    let bob = join(&hub, &store, context("bob", Platform::Embeddable, RoleMode::Claim), &bob_player).await;

    assert!(!bob.transfer_host("bob").await.unwrap());
    assert!(alice.is_host());

    assert!(alice.transfer_host("bob").await.unwrap());
    assert_eq!(alice.role(), Role::Viewer);
    assert_eq!(bob.refresh_role().await, Role::Host);
}

#[tokio::test(start_paused = true)]
async fn test_leave_stops_timers_and_presence() {
    let hub = LocalHub::new();
    let store = Arc::new(InMemoryMembershipStore::new());
    let (watcher, mut rx) = spy(&hub).await;
    let player = Arc::new(FakePlayer::at(1.0));
    let alice = join(&hub, &store, context("alice", Platform::Embeddable, RoleMode::Claim), &player).await;
    assert!(watcher.presence_snapshot(ROOM).contains("alice"));

    alice.leave().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(published(&mut rx).is_empty());
    assert!(!watcher.presence_snapshot(ROOM).contains("alice"));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_reported_and_recovers() {
    let hub = LocalHub::new();
    let store = Arc::new(InMemoryMembershipStore::new());
    let observer = Arc::new(RecordingObserver::default());
    let player = Arc::new(FakePlayer::at(0.0));
    let session = RoomSession::join(
        context("alice", Platform::Embeddable, RoleMode::Claim),
        Arc::new(hub.endpoint()),
        store.clone(),
        AdapterSource::Ready(player.clone()),
        observer.clone(),
    )
    .await
    .unwrap();
    settle().await;

    hub.set_online(false);
    settle().await;
    assert_eq!(session.status().to_string(), "Disconnected | Room room | host");

    hub.set_online(true);
    settle().await;
    assert!(session.status().connection.is_connected());
    assert_eq!(
        *observer.connections.lock(),
        vec![
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connected
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_external_video_is_probed_until_found() {
    let hub = LocalHub::new();
    let store = store_with_host("alice").await;
    let element = Arc::new(StubElement::default());
    let probe = Arc::new(LateProbe {
        element: element.clone(),
        appear_after: 2,
        probes: AtomicUsize::new(0),
    });

    let _ext = RoomSession::join(
        context("bob", Platform::External, RoleMode::Poll),
        Arc::new(hub.endpoint()),
        store.clone(),
        AdapterSource::Probe(probe),
        Arc::new(NoopObserver),
    )
    .await
    .unwrap();
    let (host, _rx) = spy(&hub).await;

    // No element yet: the event is dropped, not an error
    host.publish(ROOM, &SyncEvent::seek("alice", ROOM, Platform::External, 30.0, None))
        .unwrap();
    settle().await;
    assert_eq!(*element.time.lock(), 0.0);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    host.publish(ROOM, &SyncEvent::seek("alice", ROOM, Platform::External, 30.0, None))
        .unwrap();
    settle().await;
    assert_eq!(*element.time.lock(), 30.0);
}

#[tokio::test(start_paused = true)]
async fn test_leave_releases_video_element_listener() {
    let hub = LocalHub::new();
    let store = store_with_host("alice").await;
    let element = Arc::new(StubElement::default());
    let probe = Arc::new(LateProbe {
        element: element.clone(),
        appear_after: 0,
        probes: AtomicUsize::new(0),
    });

    let ext = RoomSession::join(
        context("bob", Platform::External, RoleMode::Poll),
        Arc::new(hub.endpoint()),
        store.clone(),
        AdapterSource::Probe(probe),
        Arc::new(NoopObserver),
    )
    .await
    .unwrap();
    settle().await;
    assert_eq!(element.listeners.lock().len(), 1);
    assert!(!element.listeners.lock()[0].is_closed());

    ext.leave().await;
    settle().await;
    assert!(element.listeners.lock()[0].is_closed());
}
