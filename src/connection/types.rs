//! Connection state and tuning types

use rand::Rng;
use std::time::Duration;

/// Lifecycle of the broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No link; initial and final state
    #[default]
    Disconnected,
    /// Handshake (or reconnect) in progress
    Connecting,
    /// Handshake completed, frames flow
    Connected,
    /// Retries exhausted or handshake rejected; terminal until the next `connect`
    Failed,
}

impl ConnectionState {
    /// Whether a link is live or being established
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Short label for status bars
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }
}

/// Timeouts and retry policy for the broker connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Upper bound on waiting for CONNECTED
    pub handshake_timeout: Duration,
    /// Attempts per connect or reconnect before giving up
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts
    pub retry_base_delay: Duration,
    /// Heart-beat interval announced to the broker (0 disables)
    pub heartbeat: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(1000),
            heartbeat: Duration::from_secs(10),
        }
    }
}

/// Delay before the attempt following `attempt` (1-based)
///
/// `base * 2^(attempt-1)` plus up to 25% random jitter.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = base.saturating_mul(1u32 << exponent);
    let max_jitter_ms = (delay.as_millis() / 4) as u64;
    if max_jitter_ms == 0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..=max_jitter_ms);
    delay + Duration::from_millis(jitter)
}
