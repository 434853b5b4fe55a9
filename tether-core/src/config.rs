//! Client configuration for Tether
//!
//! This module provides the knobs shared by every host: handshake deadline,
//! keepalive and reconnect behaviour, and extra handshake headers. Heartbeat
//! and reconnect are both off unless explicitly enabled.

use crate::error::{ConfigError, Error};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default handshake deadline
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default keepalive interval for the self-driven transport
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Default delay between reconnect attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Keepalive frame payload understood by the server
pub const KEEPALIVE_PAYLOAD: &str = "ping";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct ClientConfig {
    /// Handshake timeout
    pub handshake_timeout: Duration,
    /// Keepalive configuration
    pub heartbeat: HeartbeatConfig,
    /// Reconnect configuration
    pub reconnect: ReconnectConfig,
    /// User agent string
    pub user_agent: String,
    /// Custom handshake headers
    pub headers: Vec<(String, String)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            user_agent: format!("tether/{}", env!("CARGO_PKG_VERSION")),
            headers: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.handshake_timeout.is_zero() {
            return Err(Error::Config(ConfigError::Validation(
                "handshake_timeout must be greater than 0".to_string(),
            )));
        }

        self.heartbeat.validate()?;
        self.reconnect.validate()?;

        if http::HeaderValue::from_str(&self.user_agent).is_err() {
            return Err(ConfigError::invalid("user_agent", &self.user_agent).into());
        }

        for (name, value) in &self.headers {
            if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(ConfigError::invalid("headers", name).into());
            }
            if http::HeaderValue::from_str(value).is_err() {
                return Err(ConfigError::invalid(name, value).into());
            }
        }

        Ok(())
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Enable keepalive frames at the given interval
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat.enabled = true;
        self.heartbeat.interval = interval;
        self
    }

    /// Replace the keepalive payload
    pub fn heartbeat_payload(mut self, payload: impl Into<String>) -> Self {
        self.heartbeat.payload = payload.into();
        self
    }

    /// Enable automatic reconnect with a fixed retry interval
    pub fn auto_reconnect(mut self, interval: Duration) -> Self {
        self.reconnect.enabled = true;
        self.reconnect.interval = interval;
        self
    }

    /// Cap the number of retries per disconnect
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect.max_attempts = Some(attempts);
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Add a custom handshake header
    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Keepalive configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct HeartbeatConfig {
    /// Send keepalive frames while connected
    pub enabled: bool,
    /// Time between keepalive frames
    pub interval: Duration,
    /// Keepalive frame payload
    pub payload: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            payload: KEEPALIVE_PAYLOAD.to_string(),
        }
    }
}

impl HeartbeatConfig {
    fn validate(&self) -> crate::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.interval.is_zero() {
            return Err(Error::Config(ConfigError::Validation(
                "heartbeat interval must be greater than 0".to_string(),
            )));
        }
        if self.payload.is_empty() {
            return Err(Error::Config(ConfigError::MissingField {
                field: "heartbeat.payload".to_string(),
            }));
        }
        Ok(())
    }
}

/// Reconnect configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct ReconnectConfig {
    /// Retry after an unexpected disconnect
    pub enabled: bool,
    /// Delay before each attempt
    pub interval: Duration,
    /// Give up after this many failed attempts; `None` retries until closed
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: DEFAULT_RECONNECT_INTERVAL,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> crate::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.interval.is_zero() {
            return Err(Error::Config(ConfigError::Validation(
                "reconnect interval must be greater than 0".to_string(),
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::invalid("reconnect.max_attempts", 0).into());
        }
        Ok(())
    }
}
