//! In-process channel hub
//!
//! Every participant gets its own [`LocalChannel`] endpoint from a shared
//! [`LocalHub`]. Broadcast semantics match the realtime transport: no
//! self-delivery, no replay, presence released on unsubscribe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{ChannelError, ChannelEvent, ConnectionStatus, SyncChannel};
use crate::sync::{PresenceSet, SyncEvent};

#[derive(Default)]
struct Topic {
    subscribers: HashMap<u64, mpsc::UnboundedSender<ChannelEvent>>,
    /// endpoint -> tracked user id
    tracked: HashMap<u64, String>,
}

impl Topic {
    fn presence(&self) -> PresenceSet {
        self.tracked.values().cloned().collect()
    }

    fn send_all(&self, event: ChannelEvent) {
        for tx in self.subscribers.values() {
            let _ = tx.send(event.clone());
        }
    }
}

struct HubInner {
    topics: HashMap<String, Topic>,
    online: bool,
}

/// Shared message hub
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<Mutex<HubInner>>,
    next_endpoint: Arc<AtomicU64>,
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                topics: HashMap::new(),
                online: true,
            })),
            next_endpoint: Arc::new(AtomicU64::new(1)),
        }
    }

    /// New participant endpoint on this hub
    pub fn endpoint(&self) -> LocalChannel {
        LocalChannel {
            hub: self.clone(),
            id: self.next_endpoint.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Simulate transport connectivity. Publishes are dropped while offline.
    pub fn set_online(&self, online: bool) {
        let mut inner = self.inner.lock();
        if inner.online == online {
            return;
        }
        inner.online = online;
        let status = if online {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        };
        debug!("Local hub now {}", status);
        for topic in inner.topics.values() {
            topic.send_all(ChannelEvent::Status(status));
        }
    }
}

/// One participant's view of a [`LocalHub`]
pub struct LocalChannel {
    hub: LocalHub,
    id: u64,
}

#[async_trait]
impl SyncChannel for LocalChannel {
    async fn subscribe(
        &self,
        room_id: &str,
        _user_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<ChannelEvent>, ChannelError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.hub.inner.lock();
        let status = if inner.online {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        };
        let _ = tx.send(ChannelEvent::Status(status));

        let topic = inner.topics.entry(room_id.to_string()).or_default();
        let _ = tx.send(ChannelEvent::Presence(topic.presence()));
        topic.subscribers.insert(self.id, tx);
        Ok(rx)
    }

    fn publish(&self, room_id: &str, event: &SyncEvent) -> Result<(), ChannelError> {
        let inner = self.hub.inner.lock();
        let topic = inner
            .topics
            .get(room_id)
            .filter(|t| t.subscribers.contains_key(&self.id))
            .ok_or_else(|| ChannelError::NotSubscribed(room_id.to_string()))?;

        if !inner.online {
            trace!("Hub offline, dropping {:?}", event.kind());
            return Ok(());
        }

        for (id, tx) in &topic.subscribers {
            if *id != self.id {
                let _ = tx.send(ChannelEvent::Sync(event.clone()));
            }
        }
        Ok(())
    }

    async fn track_presence(&self, room_id: &str, user_id: &str) -> Result<(), ChannelError> {
        let mut inner = self.hub.inner.lock();
        let topic = inner
            .topics
            .get_mut(room_id)
            .filter(|t| t.subscribers.contains_key(&self.id))
            .ok_or_else(|| ChannelError::NotSubscribed(room_id.to_string()))?;

        topic.tracked.insert(self.id, user_id.to_string());
        topic.send_all(ChannelEvent::Presence(topic.presence()));
        Ok(())
    }

    fn presence_snapshot(&self, room_id: &str) -> PresenceSet {
        self.hub
            .inner
            .lock()
            .topics
            .get(room_id)
            .map(Topic::presence)
            .unwrap_or_default()
    }

    async fn unsubscribe(&self, room_id: &str) {
        let mut inner = self.hub.inner.lock();
        if let Some(topic) = inner.topics.get_mut(room_id) {
            topic.subscribers.remove(&self.id);
            if topic.tracked.remove(&self.id).is_some() {
                topic.send_all(ChannelEvent::Presence(topic.presence()));
            }
        }
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        let mut inner = self.hub.inner.lock();
        for topic in inner.topics.values_mut() {
            topic.subscribers.remove(&self.id);
            if topic.tracked.remove(&self.id).is_some() {
                topic.send_all(ChannelEvent::Presence(topic.presence()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Platform;

    fn drain(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn syncs(events: &[ChannelEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ChannelEvent::Sync(_)))
            .count()
    }

    #[tokio::test]
    async fn test_publish_skips_sender() {
        let hub = LocalHub::new();
        let a = hub.endpoint();
        let b = hub.endpoint();
        let mut rx_a = a.subscribe("room", "alice").await.unwrap();
        let mut rx_b = b.subscribe("room", "bob").await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let event = SyncEvent::play("alice", "room", Platform::Embeddable, 10.0, None);
        a.publish("room", &event).unwrap();

        assert_eq!(syncs(&drain(&mut rx_a)), 0);
        assert_eq!(syncs(&drain(&mut rx_b)), 1);
    }

    #[tokio::test]
    async fn test_publish_requires_subscription() {
        let hub = LocalHub::new();
        let a = hub.endpoint();
        let event = SyncEvent::pause("alice", "room", Platform::Embeddable, 1.0, None);
        assert!(matches!(
            a.publish("room", &event),
            Err(ChannelError::NotSubscribed(_))
        ));
    }

    #[tokio::test]
    async fn test_presence_tracks_and_releases() {
        let hub = LocalHub::new();
        let a = hub.endpoint();
        let b = hub.endpoint();
        let _rx_a = a.subscribe("room", "alice").await.unwrap();
        let _rx_b = b.subscribe("room", "bob").await.unwrap();
        a.track_presence("room", "alice").await.unwrap();
        b.track_presence("room", "bob").await.unwrap();
        assert_eq!(a.presence_snapshot("room").len(), 2);

        b.unsubscribe("room").await;
        let presence = a.presence_snapshot("room");
        assert!(presence.contains("alice"));
        assert!(!presence.contains("bob"));
    }

    #[tokio::test]
    async fn test_offline_drops_broadcasts() {
        let hub = LocalHub::new();
        let a = hub.endpoint();
        let b = hub.endpoint();
        let _rx_a = a.subscribe("room", "alice").await.unwrap();
        let mut rx_b = b.subscribe("room", "bob").await.unwrap();
        drain(&mut rx_b);

        hub.set_online(false);
        let event = SyncEvent::seek("alice", "room", Platform::External, 5.0, None);
        a.publish("room", &event).unwrap();
        hub.set_online(true);

        let events = drain(&mut rx_b);
        assert_eq!(syncs(&events), 0);
        assert!(events
            .iter()
            .any(|e| matches!(e, ChannelEvent::Status(ConnectionStatus::Disconnected))));
        assert!(events
            .iter()
            .any(|e| matches!(e, ChannelEvent::Status(ConnectionStatus::Connected))));
    }
}
