//! Reconnect policy
//!
//! One policy value covers one disconnect episode: it is created when a live
//! binding is lost and dropped once a retry succeeds or the budget runs out.

use crate::config::ReconnectConfig;
use std::time::Duration;

/// Fixed-interval retry schedule with an optional attempt cap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    interval: Duration,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Build a policy, or `None` when reconnect is disabled
    pub fn from_config(config: &ReconnectConfig) -> Option<Self> {
        config.enabled.then(|| Self {
            interval: config.interval,
            max_attempts: config.max_attempts,
            attempts: 0,
        })
    }

    /// Delay before the next attempt, or `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.interval)
    }

    /// Whether no attempts remain
    pub fn exhausted(&self) -> bool {
        self.max_attempts.is_some_and(|max| self.attempts >= max)
    }

    /// Attempts scheduled so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
