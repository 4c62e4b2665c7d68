//! Reconnect backoff

use std::time::Duration;

/// Linear backoff: attempt `n` waits `base_delay × n`
///
/// After `max_attempts` consecutive failures the client gives up until it is
/// explicitly reconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(2000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based), `None` once exhausted
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay * attempt)
    }
}
