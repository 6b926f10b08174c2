//! Shared timing configuration
//!
//! Every interval, window and threshold the sync protocol uses lives here,
//! so the embedded-player context and the extension context can never
//! disagree on a literal.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::Platform;

/// Version of the timing set below. Bump whenever a default changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Timing constants for one execution context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncTiming {
    /// Drift (seconds) above which a viewer force-seeks to the host position
    pub drift_threshold_secs: f64,
    /// Echo suppression window for the embedded player
    pub embedded_echo_window_ms: u64,
    /// Echo suppression window for an externally rendered video element
    pub external_echo_window_ms: u64,
    /// How often the host samples its position for SEEK
    pub seek_poll_interval_ms: u64,
    /// Quiet period before a sampled position is sent as SEEK
    pub seek_debounce_ms: u64,
    /// Host PING period
    pub heartbeat_interval_ms: u64,
    /// Role lookup period (extension context only)
    pub role_poll_interval_ms: u64,
    /// Transport keep-alive period (direct protocol only)
    pub transport_heartbeat_interval_ms: u64,
    /// Longest a websocket handshake may take before it counts as failed
    pub transport_connect_timeout_ms: u64,
    /// Delay between attempts to find the page's video element
    pub adapter_probe_backoff_ms: u64,
    /// Base delay before a transport reconnect attempt
    pub reconnect_backoff_ms: u64,
}

impl Default for SyncTiming {
    fn default() -> Self {
        Self {
            drift_threshold_secs: 0.75,
            embedded_echo_window_ms: 150,
            external_echo_window_ms: 350,
            seek_poll_interval_ms: 5_000,
            seek_debounce_ms: 250,
            heartbeat_interval_ms: 3_000,
            role_poll_interval_ms: 5_000,
            transport_heartbeat_interval_ms: 30_000,
            transport_connect_timeout_ms: 10_000,
            adapter_probe_backoff_ms: 1_200,
            reconnect_backoff_ms: 2_000,
        }
    }
}

impl SyncTiming {
    /// Echo window for the given player platform. The external window is
    /// wider because native media elements dispatch their events later.
    pub fn echo_window(&self, platform: Platform) -> Duration {
        match platform {
            Platform::Embeddable => Duration::from_millis(self.embedded_echo_window_ms),
            Platform::External => Duration::from_millis(self.external_echo_window_ms),
        }
    }

    pub fn seek_poll_interval(&self) -> Duration {
        Duration::from_millis(self.seek_poll_interval_ms)
    }

    pub fn seek_debounce(&self) -> Duration {
        Duration::from_millis(self.seek_debounce_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn role_poll_interval(&self) -> Duration {
        Duration::from_millis(self.role_poll_interval_ms)
    }

    pub fn transport_heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.transport_heartbeat_interval_ms)
    }

    pub fn transport_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_connect_timeout_ms)
    }

    pub fn adapter_probe_backoff(&self) -> Duration {
        Duration::from_millis(self.adapter_probe_backoff_ms)
    }

    /// Reconnect delay with up to 25% random jitter so a room full of
    /// clients does not reconnect in lockstep
    pub fn reconnect_delay(&self) -> Duration {
        use rand::Rng;
        let jitter = rand::thread_rng().gen_range(0..=self.reconnect_backoff_ms / 4);
        Duration::from_millis(self.reconnect_backoff_ms + jitter)
    }
}
