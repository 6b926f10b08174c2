//! Realtime websocket channel
//!
//! One websocket per channel, multiplexing room topics. A background task
//! owns the socket; the [`RealtimeChannel`] handle talks to it over a
//! command queue.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use super::frame::{self, apply_presence, room_from_topic, Frame};
use super::{ChannelError, ChannelEvent, ConnectionStatus, SyncChannel};
use crate::bridge::AuthContext;
use crate::config::SyncTiming;
use crate::sync::{PresenceSet, SyncEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const WEBSOCKET_PATH: &str = "/realtime/v1/websocket";
const PROTOCOL_VSN: &str = "1.0.0";

/// Connection settings for the realtime server
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Project base URL (`https://...`)
    pub endpoint: String,
    pub anon_key: String,
    pub access_token: String,
    pub timing: SyncTiming,
}

impl RealtimeConfig {
    pub fn from_auth(auth: &AuthContext, timing: SyncTiming) -> Self {
        Self {
            endpoint: auth.realtime_endpoint.clone(),
            anon_key: auth.anon_key.clone(),
            access_token: auth.access_token.clone(),
            timing,
        }
    }

    /// Websocket URL derived from the project endpoint
    pub fn websocket_url(&self) -> Result<Url, ChannelError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| ChannelError::Transport(format!("Invalid endpoint {}: {}", self.endpoint, e)))?;

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(ChannelError::Transport(format!(
                    "Unsupported endpoint scheme: {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ChannelError::Transport("Cannot switch endpoint scheme".to_string()))?;

        let path = format!("{}{}", url.path().trim_end_matches('/'), WEBSOCKET_PATH);
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", &self.anon_key)
            .append_pair("access_token", &self.access_token)
            .append_pair("vsn", PROTOCOL_VSN);
        Ok(url)
    }
}

/// Commands sent to the socket task
enum Command {
    Join {
        room_id: String,
        user_id: String,
        events: mpsc::UnboundedSender<ChannelEvent>,
    },
    Track {
        room_id: String,
        user_id: String,
    },
    Broadcast {
        room_id: String,
        event: SyncEvent,
    },
    Leave {
        room_id: String,
    },
    Shutdown,
}

/// Handle to the realtime socket task
pub struct RealtimeChannel {
    command_tx: mpsc::UnboundedSender<Command>,
    presence: Arc<RwLock<HashMap<String, PresenceSet>>>,
}

impl RealtimeChannel {
    /// Spawn the socket task. Must be called within a Tokio runtime.
    pub fn connect(config: RealtimeConfig) -> Result<Self, ChannelError> {
        let url = config.websocket_url()?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let presence = Arc::new(RwLock::new(HashMap::new()));

        let manager = SocketManager {
            url,
            timing: config.timing,
            rooms: HashMap::new(),
            presence: presence.clone(),
            connected: false,
            next_ref: 0,
        };
        tokio::spawn(manager.run(command_rx));

        Ok(Self {
            command_tx,
            presence,
        })
    }

    /// Stop the socket task, leaving all topics
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }

    fn send(&self, command: Command) -> Result<(), ChannelError> {
        self.command_tx
            .send(command)
            .map_err(|_| ChannelError::Closed)
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl SyncChannel for RealtimeChannel {
    async fn subscribe(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<ChannelEvent>, ChannelError> {
        let (events, rx) = mpsc::unbounded_channel();
        self.send(Command::Join {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            events,
        })?;
        Ok(rx)
    }

    fn publish(&self, room_id: &str, event: &SyncEvent) -> Result<(), ChannelError> {
        self.send(Command::Broadcast {
            room_id: room_id.to_string(),
            event: event.clone(),
        })
    }

    async fn track_presence(&self, room_id: &str, user_id: &str) -> Result<(), ChannelError> {
        self.send(Command::Track {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
        })
    }

    fn presence_snapshot(&self, room_id: &str) -> PresenceSet {
        self.presence.read().get(room_id).cloned().unwrap_or_default()
    }

    async fn unsubscribe(&self, room_id: &str) {
        self.presence.write().remove(room_id);
        let _ = self.send(Command::Leave {
            room_id: room_id.to_string(),
        });
    }
}

struct RoomSubscription {
    user_id: String,
    events: mpsc::UnboundedSender<ChannelEvent>,
    tracked: bool,
}

/// Why a connected session ended
enum SessionEnd {
    Dropped,
    Shutdown,
}

/// Owns the websocket and all room subscriptions
struct SocketManager {
    url: Url,
    timing: SyncTiming,
    rooms: HashMap<String, RoomSubscription>,
    presence: Arc<RwLock<HashMap<String, PresenceSet>>>,
    connected: bool,
    next_ref: u64,
}

impl SocketManager {
    fn next_ref(&mut self) -> u64 {
        self.next_ref += 1;
        self.next_ref
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        let connected = status.is_connected();
        if self.connected == connected && status != ConnectionStatus::Connecting {
            return;
        }
        self.connected = connected;
        for room in self.rooms.values() {
            let _ = room.events.send(ChannelEvent::Status(status));
        }
    }

    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            debug!("Connecting to realtime server at {}", self.url.host_str().unwrap_or("?"));
            let limit = self.timing.transport_connect_timeout();
            match tokio::time::timeout(limit, connect_async(self.url.as_str())).await {
                Ok(Ok((ws, _))) => {
                    info!("Realtime socket connected");
                    match self.drive(ws, &mut command_rx).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Dropped => warn!("Realtime socket dropped"),
                    }
                }
                Ok(Err(e)) => warn!("Realtime connection failed: {}", e),
                Err(_) => warn!("Realtime handshake timed out after {:?}", limit),
            }

            self.set_status(ConnectionStatus::Disconnected);
            self.presence.write().clear();

            if !self.wait_offline(&mut command_rx).await {
                break;
            }
        }
        info!("Realtime socket task stopped");
    }

    /// Sit out the reconnect delay. Joins and leaves are recorded for the
    /// next connection; broadcasts are dropped. Returns false on shutdown.
    async fn wait_offline(&mut self, command_rx: &mut mpsc::UnboundedReceiver<Command>) -> bool {
        let delay = tokio::time::sleep(self.timing.reconnect_delay());
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => return true,
                cmd = command_rx.recv() => match cmd {
                    None | Some(Command::Shutdown) => return false,
                    Some(Command::Join { room_id, user_id, events }) => {
                        let _ = events.send(ChannelEvent::Status(ConnectionStatus::Disconnected));
                        self.rooms.insert(room_id, RoomSubscription { user_id, events, tracked: false });
                    }
                    Some(Command::Track { room_id, .. }) => {
                        if let Some(room) = self.rooms.get_mut(&room_id) {
                            room.tracked = true;
                        }
                    }
                    Some(Command::Leave { room_id }) => {
                        self.rooms.remove(&room_id);
                    }
                    Some(Command::Broadcast { event, .. }) => {
                        trace!("Offline, dropping {:?}", event.kind());
                    }
                },
            }
        }
    }

    async fn drive(
        &mut self,
        ws: WsStream,
        command_rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> SessionEnd {
        let (mut write, mut read) = ws.split();

        // Re-join everything we were subscribed to before
        let rooms: Vec<(String, String, bool)> = self
            .rooms
            .iter()
            .map(|(id, room)| (id.clone(), room.user_id.clone(), room.tracked))
            .collect();
        for (room_id, user_id, tracked) in rooms {
            let reference = self.next_ref();
            if !send_frame(&mut write, Frame::join(&room_id, &user_id, reference)).await {
                return SessionEnd::Dropped;
            }
            if tracked {
                let reference = self.next_ref();
                if !send_frame(&mut write, Frame::track(&room_id, &user_id, reference)).await {
                    return SessionEnd::Dropped;
                }
            }
        }
        self.set_status(ConnectionStatus::Connected);

        let mut heartbeat = tokio::time::interval(self.timing.transport_heartbeat_interval());
        heartbeat.tick().await;

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Realtime socket error: {}", e);
                        return SessionEnd::Dropped;
                    }
                },
                cmd = command_rx.recv() => {
                    let frame = match cmd {
                        None | Some(Command::Shutdown) => {
                            self.leave_all(&mut write).await;
                            let _ = write.close().await;
                            return SessionEnd::Shutdown;
                        }
                        Some(Command::Join { room_id, user_id, events }) => {
                            let _ = events.send(ChannelEvent::Status(ConnectionStatus::Connected));
                            let frame = Frame::join(&room_id, &user_id, self.next_ref());
                            self.rooms.insert(room_id, RoomSubscription { user_id, events, tracked: false });
                            frame
                        }
                        Some(Command::Track { room_id, user_id }) => {
                            match self.rooms.get_mut(&room_id) {
                                Some(room) => room.tracked = true,
                                None => {
                                    debug!("Track for unknown room {}", room_id);
                                    continue;
                                }
                            }
                            Frame::track(&room_id, &user_id, self.next_ref())
                        }
                        Some(Command::Broadcast { room_id, event }) => {
                            if !self.rooms.contains_key(&room_id) {
                                debug!("Broadcast to unjoined room {} dropped", room_id);
                                continue;
                            }
                            Frame::broadcast(&room_id, &event, self.next_ref())
                        }
                        Some(Command::Leave { room_id }) => {
                            if self.rooms.remove(&room_id).is_none() {
                                continue;
                            }
                            Frame::leave(&room_id, self.next_ref())
                        }
                    };
                    if !send_frame(&mut write, frame).await {
                        return SessionEnd::Dropped;
                    }
                }
                _ = heartbeat.tick() => {
                    let frame = Frame::heartbeat(self.next_ref());
                    if !send_frame(&mut write, frame).await {
                        return SessionEnd::Dropped;
                    }
                }
            }
        }
    }

    async fn leave_all(&mut self, write: &mut WsSink) {
        let rooms: Vec<String> = self.rooms.drain().map(|(id, _)| id).collect();
        for room_id in rooms {
            let reference = self.next_ref();
            send_frame(write, Frame::leave(&room_id, reference)).await;
        }
    }

    fn handle_text(&mut self, text: &str) {
        let Some(frame) = Frame::parse(text) else {
            debug!("Ignoring unparseable realtime frame");
            return;
        };
        let Some(room_id) = room_from_topic(&frame.topic) else {
            return;
        };
        let Some(room) = self.rooms.get(room_id) else {
            trace!("Frame for unjoined topic {}", frame.topic);
            return;
        };

        {
            let mut presence = self.presence.write();
            let set = presence.entry(room_id.to_string()).or_default();
            if apply_presence(&frame, set) {
                let _ = room.events.send(ChannelEvent::Presence(set.clone()));
                return;
            }
        }

        if let Some(event) = frame.sync_event() {
            let _ = room.events.send(ChannelEvent::Sync(event));
            return;
        }

        match frame.event.as_str() {
            frame::EVENT_ERROR | frame::EVENT_CLOSE => {
                warn!("Realtime topic {} closed: {}", frame.topic, frame.event);
            }
            frame::EVENT_REPLY if frame.is_error_reply() => {
                warn!("Realtime request on {} rejected: {}", frame.topic, frame.payload);
            }
            _ => {}
        }
    }
}

async fn send_frame(write: &mut WsSink, frame: Frame) -> bool {
    match write.send(Message::Text(frame.to_text())).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Realtime send failed: {}", e);
            false
        }
    }
}
