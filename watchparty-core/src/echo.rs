//! Echo suppression
//!
//! Applying a remote event makes the local player fire the same
//! play/pause/seeking notifications a user action would. For a short
//! window after each applied event those notifications are treated as
//! our own echo and never re-broadcast. This is timer-based, not
//! identity-based, so a genuine user action inside the window is lost.

use std::time::Duration;

use tokio::time::Instant;

/// Single-writer suppression deadline for one room session
#[derive(Debug, Clone)]
pub struct EchoSuppressor {
    window: Duration,
    deadline: Option<Instant>,
}

impl EchoSuppressor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Open the window; call right before applying an inbound event
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    /// Whether a local state change observed at `now` is an echo
    pub fn is_suppressed(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now < deadline)
    }

    pub fn clear(&mut self) {
        self.deadline = None;
    }
}
