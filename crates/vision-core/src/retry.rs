//! Linear backoff for the push channel.
//!
//! Two independent counters drive retries:
//!
//! - `connect_retry_count` grows on every close and resets on a successful
//!   open. Reconnects are scheduled while it is below
//!   [`RetryPolicy::max_connect_retries`]; at the ceiling the channel gives up.
//! - `send_retry_count` grows on every failed send and resets on a
//!   successful one. Sends are retried forever.
//!
//! Both delays are `count * step` using the post-increment count.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default backoff increment in milliseconds.
pub const DEFAULT_RETRY_STEP_MS: u64 = 500;
/// Default ceiling on consecutive failed connects.
pub const DEFAULT_MAX_CONNECT_RETRIES: u32 = 20;

/// Backoff parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Delay increment per attempt in ms (default: 500).
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,
    /// Consecutive closes after which reconnecting stops (default: 20).
    #[serde(default = "default_max_connect_retries")]
    pub max_connect_retries: u32,
}

fn default_step_ms() -> u64 {
    DEFAULT_RETRY_STEP_MS
}
fn default_max_connect_retries() -> u32 {
    DEFAULT_MAX_CONNECT_RETRIES
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            step_ms: DEFAULT_RETRY_STEP_MS,
            max_connect_retries: DEFAULT_MAX_CONNECT_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.step_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Outcome of a close event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Schedule a reconnect after `delay`.
    Retry {
        /// Post-increment connect retry count.
        attempt: u32,
        /// How long to wait.
        delay: Duration,
    },
    /// Retry ceiling reached; no further automatic reconnects.
    GiveUp {
        /// Post-increment connect retry count.
        attempts: u32,
    },
}

/// Connect and send retry counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryState {
    connect_retry_count: u32,
    send_retry_count: u32,
}

impl RetryState {
    /// Fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive closes since the last successful open.
    pub fn connect_retry_count(&self) -> u32 {
        self.connect_retry_count
    }

    /// Consecutive failed sends since the last successful send.
    pub fn send_retry_count(&self) -> u32 {
        self.send_retry_count
    }

    /// Whether the connect ceiling has been reached.
    pub fn exhausted(&self, policy: &RetryPolicy) -> bool {
        self.connect_retry_count >= policy.max_connect_retries
    }

    /// The channel opened.
    pub fn on_open(&mut self) {
        self.connect_retry_count = 0;
    }

    /// The channel closed (failed to open, or an open channel was lost).
    pub fn on_close(&mut self, policy: &RetryPolicy) -> ReconnectDecision {
        self.connect_retry_count = self.connect_retry_count.saturating_add(1);
        let attempt = self.connect_retry_count;
        if attempt < policy.max_connect_retries {
            ReconnectDecision::Retry {
                attempt,
                delay: policy.delay_for(attempt),
            }
        } else {
            ReconnectDecision::GiveUp { attempts: attempt }
        }
    }

    /// A frame was written.
    pub fn on_send_ok(&mut self) {
        self.send_retry_count = 0;
    }

    /// A write failed; returns the delay before retrying it.
    pub fn on_send_failed(&mut self, policy: &RetryPolicy) -> Duration {
        self.send_retry_count = self.send_retry_count.saturating_add(1);
        policy.delay_for(self.send_retry_count)
    }
}
