//! Adapter over a native video element on a third-party page
//!
//! The hosting page is not ours, so the video element may not exist when
//! we start. Acquisition polls the document on a fixed backoff until an
//! element shows up; absence is a normal, retryable state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{AdapterError, PlaybackAdapter, PlayerSignal};

/// Native media events the element can report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    Play,
    Pause,
    Seeking,
    Waiting,
    Ended,
    LoadedData,
}

impl From<MediaEvent> for PlayerSignal {
    fn from(event: MediaEvent) -> Self {
        match event {
            MediaEvent::Play => PlayerSignal::Playing,
            MediaEvent::Pause => PlayerSignal::Paused,
            MediaEvent::Seeking => PlayerSignal::Seeking,
            MediaEvent::Waiting => PlayerSignal::Buffering,
            MediaEvent::Ended => PlayerSignal::Ended,
            MediaEvent::LoadedData => PlayerSignal::Ready,
        }
    }
}

/// Handle to a media element living in a document we do not control
pub trait MediaElement: Send + Sync {
    fn current_time(&self) -> f64;
    fn set_current_time(&self, seconds: f64);
    fn play(&self) -> Result<(), String>;
    fn pause(&self);
    /// Subscribe to the element's native events
    fn add_listener(&self, events: mpsc::UnboundedSender<MediaEvent>);
}

/// Looks for a media element in the active document
pub trait DocumentProbe: Send + Sync {
    fn find_video(&self) -> Option<Arc<dyn MediaElement>>;
}

/// Adapter over a discovered [`MediaElement`]
pub struct ExternalVideoAdapter {
    element: Arc<dyn MediaElement>,
}

impl ExternalVideoAdapter {
    pub fn new(element: Arc<dyn MediaElement>) -> Self {
        Self { element }
    }

    /// Probe once
    pub fn probe(probe: &dyn DocumentProbe) -> Option<Self> {
        probe.find_video().map(Self::new)
    }

    /// Poll the document every `backoff` until a video element appears
    pub async fn acquire(probe: Arc<dyn DocumentProbe>, backoff: Duration) -> Self {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            if let Some(adapter) = Self::probe(probe.as_ref()) {
                info!("Found video element after {} probe(s)", attempts);
                return adapter;
            }
            debug!("No video element yet, retrying in {:?}", backoff);
            tokio::time::sleep(backoff).await;
        }
    }
}

impl PlaybackAdapter for ExternalVideoAdapter {
    fn current_time(&self) -> Result<f64, AdapterError> {
        let time = self.element.current_time();
        // A detached or unloaded element reports NaN
        if time.is_finite() {
            Ok(time)
        } else {
            Err(AdapterError::NotReady)
        }
    }

    fn play(&self) -> Result<(), AdapterError> {
        self.element.play().map_err(AdapterError::Rejected)
    }

    fn pause(&self) -> Result<(), AdapterError> {
        self.element.pause();
        Ok(())
    }

    fn seek_to(&self, seconds: f64) -> Result<(), AdapterError> {
        self.element.set_current_time(seconds);
        Ok(())
    }

    fn listen(&self, signals: mpsc::UnboundedSender<PlayerSignal>) -> Option<JoinHandle<()>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.element.add_listener(tx);
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if signals.send(PlayerSignal::from(event)).is_err() {
                    break;
                }
            }
        }))
    }
}
