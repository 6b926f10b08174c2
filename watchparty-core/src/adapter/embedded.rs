//! Adapter over a first-party embeddable player

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{AdapterError, PlaybackAdapter, PlayerSignal};
use crate::sync::SourceRef;

/// Operations the embedding application exposes for its player
pub trait EmbeddedPlayer: Send + Sync {
    fn current_time(&self) -> f64;
    fn play(&self);
    fn pause(&self);
    fn seek_to(&self, seconds: f64);
    fn cue_video(&self, content_id: &str);
}

/// Native state codes reported by the embedded player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Unstarted,
    Ended,
    Playing,
    Paused,
    Buffering,
    Cued,
}

impl PlayerState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(PlayerState::Unstarted),
            0 => Some(PlayerState::Ended),
            1 => Some(PlayerState::Playing),
            2 => Some(PlayerState::Paused),
            3 => Some(PlayerState::Buffering),
            5 => Some(PlayerState::Cued),
            _ => None,
        }
    }

    fn signal(&self) -> Option<PlayerSignal> {
        match self {
            PlayerState::Playing => Some(PlayerSignal::Playing),
            PlayerState::Paused => Some(PlayerSignal::Paused),
            PlayerState::Buffering => Some(PlayerSignal::Buffering),
            PlayerState::Ended => Some(PlayerSignal::Ended),
            PlayerState::Unstarted | PlayerState::Cued => None,
        }
    }
}

/// Wraps an [`EmbeddedPlayer`]; the embedding app forwards the player's
/// ready and state-change callbacks through [`notify_ready`] and
/// [`notify_state`].
///
/// [`notify_ready`]: EmbeddedPlayerAdapter::notify_ready
/// [`notify_state`]: EmbeddedPlayerAdapter::notify_state
pub struct EmbeddedPlayerAdapter {
    player: Arc<dyn EmbeddedPlayer>,
    cued: Mutex<Option<String>>,
    signals: Mutex<Option<mpsc::UnboundedSender<PlayerSignal>>>,
}

impl EmbeddedPlayerAdapter {
    /// `content_id` is what the player was created with
    pub fn new(player: Arc<dyn EmbeddedPlayer>, content_id: Option<String>) -> Self {
        Self {
            player,
            cued: Mutex::new(content_id),
            signals: Mutex::new(None),
        }
    }

    pub fn cued_content(&self) -> Option<String> {
        self.cued.lock().clone()
    }

    pub fn notify_ready(&self) {
        self.forward(PlayerSignal::Ready);
    }

    /// Forward a native state code. Unknown codes are ignored.
    pub fn notify_state(&self, code: i32) {
        match PlayerState::from_code(code).and_then(|s| s.signal()) {
            Some(signal) => self.forward(signal),
            None => trace!("Ignoring player state code {}", code),
        }
    }

    fn forward(&self, signal: PlayerSignal) {
        if let Some(tx) = self.signals.lock().as_ref() {
            let _ = tx.send(signal);
        }
    }
}

impl PlaybackAdapter for EmbeddedPlayerAdapter {
    fn current_time(&self) -> Result<f64, AdapterError> {
        Ok(self.player.current_time())
    }

    fn play(&self) -> Result<(), AdapterError> {
        self.player.play();
        Ok(())
    }

    fn pause(&self) -> Result<(), AdapterError> {
        self.player.pause();
        Ok(())
    }

    fn seek_to(&self, seconds: f64) -> Result<(), AdapterError> {
        self.player.seek_to(seconds);
        Ok(())
    }

    fn cue(&self, source: &SourceRef) -> Result<(), AdapterError> {
        let Some(content_id) = source.content_id.as_deref() else {
            return Ok(());
        };

        let mut cued = self.cued.lock();
        if cued.as_deref() == Some(content_id) {
            return Ok(());
        }
        debug!("Cueing content {}", content_id);
        self.player.cue_video(content_id);
        *cued = Some(content_id.to_string());
        Ok(())
    }

    fn listen(&self, signals: mpsc::UnboundedSender<PlayerSignal>) -> Option<JoinHandle<()>> {
        *self.signals.lock() = Some(signals);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct StubPlayer {
        cued: Mutex<Vec<String>>,
    }

    impl EmbeddedPlayer for StubPlayer {
        fn current_time(&self) -> f64 {
            42.0
        }
        fn play(&self) {}
        fn pause(&self) {}
        fn seek_to(&self, _seconds: f64) {}
        fn cue_video(&self, content_id: &str) {
            self.cued.lock().push(content_id.to_string());
        }
    }

    #[test]
    fn test_state_codes_map_to_signals() {
        let adapter = EmbeddedPlayerAdapter::new(Arc::new(StubPlayer::default()), None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(adapter.listen(tx).is_none());

        adapter.notify_ready();
        adapter.notify_state(1);
        adapter.notify_state(2);
        adapter.notify_state(5);
        adapter.notify_state(42);
        adapter.notify_state(3);

        assert_eq!(rx.try_recv().unwrap(), PlayerSignal::Ready);
        assert_eq!(rx.try_recv().unwrap(), PlayerSignal::Playing);
        assert_eq!(rx.try_recv().unwrap(), PlayerSignal::Paused);
        assert_eq!(rx.try_recv().unwrap(), PlayerSignal::Buffering);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cue_skips_current_content() {
        let player = Arc::new(StubPlayer::default());
        let adapter = EmbeddedPlayerAdapter::new(player.clone(), Some("abc123".to_string()));

        adapter.cue(&SourceRef::content("abc123")).unwrap();
        adapter.cue(&SourceRef::url("https://example.com")).unwrap();
        assert!(player.cued.lock().is_empty());

        adapter.cue(&SourceRef::content("xyz789")).unwrap();
        adapter.cue(&SourceRef::content("xyz789")).unwrap();
        assert_eq!(*player.cued.lock(), vec!["xyz789".to_string()]);
        assert_eq!(adapter.cued_content().as_deref(), Some("xyz789"));
    }

    #[test]
    fn test_signals_before_listen_are_dropped() {
        let adapter = EmbeddedPlayerAdapter::new(Arc::new(StubPlayer::default()), None);
        adapter.notify_state(1);
        assert_eq!(adapter.current_time().unwrap(), 42.0);
    }
}
