//! Reconnect scheduling for change streams.
//!
//! Each subscription pump owns a [`Backoff`] built from the shared
//! [`ReconnectPolicy`]. The delay grows by `multiplier` after every failed
//! open or dropped stream up to `max_ms`, and returns to `initial_ms` once a
//! stream opens.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DEFAULT_INITIAL_MS: u64 = 500;
const DEFAULT_MAX_MS: u64 = 30_000;
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_JITTER_MS: u64 = 250;

/// Exponential reconnect schedule with additive jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry, in milliseconds.
    pub initial_ms: u64,
    /// Upper bound for the base delay.
    pub max_ms: u64,
    /// Growth factor applied to the base delay after each attempt.
    pub multiplier: f64,
    /// Up to this many milliseconds are added to every delay. Zero disables jitter.
    pub jitter_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_ms: DEFAULT_INITIAL_MS,
            max_ms: DEFAULT_MAX_MS,
            multiplier: DEFAULT_MULTIPLIER,
            jitter_ms: DEFAULT_JITTER_MS,
        }
    }
}

impl From<&crate::config::RealtimeSettings> for ReconnectPolicy {
    fn from(settings: &crate::config::RealtimeSettings) -> Self {
        Self {
            initial_ms: settings.initial_backoff.as_millis() as u64,
            max_ms: settings.max_backoff.as_millis() as u64,
            multiplier: settings.multiplier,
            jitter_ms: settings.jitter.as_millis() as u64,
        }
    }
}

/// Running backoff state for one subscription.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    policy: ReconnectPolicy,
    current_ms: u64,
    attempts: u32,
}

impl Backoff {
    pub(crate) fn new(policy: ReconnectPolicy) -> Self {
        Self {
            current_ms: policy.initial_ms,
            policy,
            attempts: 0,
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt; grows the base for the one after.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = jittered_backoff(self.current_ms, self.policy.jitter_ms);
        let next = (self.current_ms as f64 * self.policy.multiplier) as u64;
        self.current_ms = next.min(self.policy.max_ms);
        self.attempts = self.attempts.saturating_add(1);
        Duration::from_millis(delay)
    }

    pub(crate) fn reset(&mut self) {
        self.current_ms = self.policy.initial_ms;
        self.attempts = 0;
    }
}

fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    let jitter = nanos % jitter_ms;
    base_ms.saturating_add(jitter)
}
