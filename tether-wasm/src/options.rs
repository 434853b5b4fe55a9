//! Browser client options

use std::time::Duration;
use tether_core::{ClientConfig, Result};
use wasm_bindgen::prelude::*;

const DEFAULT_RECONNECT_INTERVAL_MS: u32 = 5_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u32 = 30_000;
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u32 = 3_000;

/// Options accepted by `new BrowserClient(options)`
///
/// All intervals are in milliseconds. A `heartbeatInterval` of 0 disables
/// keepalives.
#[wasm_bindgen]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserOptions {
    auto_reconnect: bool,
    reconnect_interval: u32,
    heartbeat_interval: u32,
    max_reconnect_attempts: Option<u32>,
    handshake_timeout: u32,
    debug: bool,
}

#[wasm_bindgen]
impl BrowserOptions {
    /// Default options
    #[wasm_bindgen(constructor)]
    pub fn new() -> BrowserOptions {
        BrowserOptions {
            auto_reconnect: false,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL_MS,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_MS,
            max_reconnect_attempts: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            debug: false,
        }
    }

    #[wasm_bindgen(getter = autoReconnect)]
    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    #[wasm_bindgen(setter = autoReconnect)]
    pub fn set_auto_reconnect(&mut self, value: bool) {
        self.auto_reconnect = value;
    }

    #[wasm_bindgen(getter = reconnectInterval)]
    pub fn reconnect_interval(&self) -> u32 {
        self.reconnect_interval
    }

    #[wasm_bindgen(setter = reconnectInterval)]
    pub fn set_reconnect_interval(&mut self, millis: u32) {
        self.reconnect_interval = millis;
    }

    #[wasm_bindgen(getter = heartbeatInterval)]
    pub fn heartbeat_interval(&self) -> u32 {
        self.heartbeat_interval
    }

    #[wasm_bindgen(setter = heartbeatInterval)]
    pub fn set_heartbeat_interval(&mut self, millis: u32) {
        self.heartbeat_interval = millis;
    }

    #[wasm_bindgen(getter = maxReconnectAttempts)]
    pub fn max_reconnect_attempts(&self) -> Option<u32> {
        self.max_reconnect_attempts
    }

    #[wasm_bindgen(setter = maxReconnectAttempts)]
    pub fn set_max_reconnect_attempts(&mut self, attempts: Option<u32>) {
        self.max_reconnect_attempts = attempts;
    }

    #[wasm_bindgen(getter = handshakeTimeout)]
    pub fn handshake_timeout(&self) -> u32 {
        self.handshake_timeout
    }

    #[wasm_bindgen(setter = handshakeTimeout)]
    pub fn set_handshake_timeout(&mut self, millis: u32) {
        self.handshake_timeout = millis;
    }

    #[wasm_bindgen(getter)]
    pub fn debug(&self) -> bool {
        self.debug
    }

    #[wasm_bindgen(setter)]
    pub fn set_debug(&mut self, value: bool) {
        self.debug = value;
    }
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserOptions {
    /// Translate into a validated core configuration
    pub fn to_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::default().handshake_timeout(millis(self.handshake_timeout));
        if self.heartbeat_interval > 0 {
            config = config.heartbeat(millis(self.heartbeat_interval));
        }
        if self.auto_reconnect {
            config = config.auto_reconnect(millis(self.reconnect_interval));
            if let Some(max) = self.max_reconnect_attempts {
                config = config.max_reconnect_attempts(max);
            }
        }
        config.validate()?;
        Ok(config)
    }
}

fn millis(value: u32) -> Duration {
    Duration::from_millis(u64::from(value))
}
