//! Pure reconnection backoff logic
//!
//! Delays grow linearly with the number of consecutive failures and are
//! capped, so an unreachable broker is retried forever at a bounded rate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Linear backoff: `delay = min(retries * step, max_delay)`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconnectPolicy {
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_step_secs() -> u64 {
    1
}

fn default_max_delay_secs() -> u64 {
    30
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            step_secs: default_step_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt after `retries` consecutive failures
    pub fn delay_for(&self, retries: u32) -> Duration {
        let secs = (retries as u64)
            .saturating_mul(self.step_secs)
            .min(self.max_delay_secs);
        Duration::from_secs(secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.step_secs == 0 {
            return Err("reconnect step_secs must be greater than 0".to_string());
        }
        if self.max_delay_secs < self.step_secs {
            return Err("reconnect max_delay_secs must be at least step_secs".to_string());
        }
        Ok(())
    }
}

/// Consecutive-failure counter driving [`ReconnectPolicy`]
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryState {
    retries: u32,
}

impl RetryState {
    pub fn reset(&mut self) {
        self.retries = 0;
    }

    /// Record a failed attempt and return how long to wait before the next
    pub fn record_failure(&mut self, policy: &ReconnectPolicy) -> Duration {
        self.retries = self.retries.saturating_add(1);
        policy.delay_for(self.retries)
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }
}
