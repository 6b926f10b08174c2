//! Periodic and event-driven tasks owned by a room session

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

use super::Shared;
use crate::adapter::{DocumentProbe, ExternalVideoAdapter, PlayerSignal};
use crate::channel::ChannelEvent;
use crate::sync::{EventKind, SyncEvent};

#[derive(Default)]
struct TaskList {
    handles: Vec<JoinHandle<()>>,
    closed: bool,
}

/// Every task a session owns. Handles pushed after [`TaskSet::abort_all`]
/// are aborted on arrival.
#[derive(Default)]
pub(super) struct TaskSet(Mutex<TaskList>);

impl TaskSet {
    pub(super) fn push(&self, handle: JoinHandle<()>) {
        let mut list = self.0.lock();
        if list.closed {
            handle.abort();
        } else {
            list.handles.push(handle);
        }
    }

    pub(super) fn abort_all(&self) {
        let mut list = self.0.lock();
        list.closed = true;
        for handle in list.handles.drain(..) {
            handle.abort();
        }
    }
}

/// Deliver channel events to the session
pub(super) async fn inbound_pump(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        if let Some(presence) = shared.handle_channel_event(event) {
            shared.on_presence(presence).await;
        }
    }
    debug!("Channel subscription for {} closed", shared.ctx.room_id);
}

/// Deliver local player notifications to the session
pub(super) async fn signal_pump(shared: Arc<Shared>, mut signals: mpsc::UnboundedReceiver<PlayerSignal>) {
    while let Some(signal) = signals.recv().await {
        shared.handle_local_signal(signal);
    }
}

/// Host PING every heartbeat interval
pub(super) async fn heartbeat_loop(shared: Arc<Shared>) {
    let mut ticker = time::interval(shared.ctx.timing.heartbeat_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if shared.is_host() {
            shared.publish_position(EventKind::Ping);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Host position sampling and debounced SEEK emission
pub(super) async fn seek_loop(shared: Arc<Shared>) {
    let mut poll = time::interval(shared.ctx.timing.seek_poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    poll.tick().await;

    loop {
        let deadline = shared.seek.lock().deadline();
        tokio::select! {
            _ = poll.tick() => {
                if !shared.is_host() {
                    continue;
                }
                if let Some(position) = shared.position() {
                    shared.seek.lock().sample(position, Instant::now());
                }
            }
            // A native seek re-armed the debounce
            _ = shared.seek_wake.notified() => {}
            _ = sleep_until(deadline) => {
                let due = shared.seek.lock().take_due(Instant::now());
                if let Some(position) = due {
                    if shared.is_host() {
                        trace!("Debounced seek to {:.2}", position);
                        let event = SyncEvent::seek(
                            &shared.ctx.user_id,
                            &shared.ctx.room_id,
                            shared.ctx.platform,
                            position,
                            shared.source.read().as_ref(),
                        );
                        shared.publish(event);
                    }
                }
            }
        }
    }
}

/// Role lookup every role poll interval
pub(super) async fn role_poll_loop(shared: Arc<Shared>) {
    let mut ticker = time::interval(shared.ctx.timing.role_poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        shared.poll_role().await;
    }
}

/// Wait for the page's video element, then attach it
pub(super) async fn acquire_adapter(shared: Arc<Shared>, probe: Arc<dyn DocumentProbe>) {
    let adapter = ExternalVideoAdapter::acquire(probe, shared.ctx.timing.adapter_probe_backoff()).await;
    shared.install_adapter(Arc::new(adapter));
    info!("Video element ready in room {}", shared.ctx.room_id);
}
