//! Host seek coalescing
//!
//! The host samples its position on a fixed poll interval (and whenever
//! the player reports a seek). Each sample re-arms a short debounce; when
//! it expires the most recent sample goes out as a single SEEK. Emissions
//! are additionally spaced at least one poll interval apart, so a burst of
//! scrubbing inside one window always collapses to one event.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct SeekDebouncer {
    debounce: Duration,
    min_spacing: Duration,
    pending: Option<f64>,
    deadline: Option<Instant>,
    last_emit: Option<Instant>,
}

impl SeekDebouncer {
    pub fn new(debounce: Duration, min_spacing: Duration) -> Self {
        Self {
            debounce,
            min_spacing,
            pending: None,
            deadline: None,
            last_emit: None,
        }
    }

    /// Record a position sample and re-arm the debounce
    pub fn sample(&mut self, position: f64, now: Instant) {
        let mut deadline = now + self.debounce;
        if let Some(last) = self.last_emit {
            deadline = deadline.max(last + self.min_spacing);
        }
        self.pending = Some(position);
        self.deadline = Some(deadline);
    }

    /// When the pending sample becomes due, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending position if its deadline has passed
    pub fn take_due(&mut self, now: Instant) -> Option<f64> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.last_emit = Some(now);
                self.pending.take()
            }
            _ => None,
        }
    }

    /// Drop any pending sample, e.g. when losing host
    pub fn reset(&mut self) {
        self.pending = None;
        self.deadline = None;
    }
}
