//! Prelude module for Tether Core
//!
//! This module re-exports commonly used types and traits to make them
//! easily accessible for users of the library.

pub use crate::config::{ClientConfig, HeartbeatConfig, ReconnectConfig};
pub use crate::dispatch::{Dispatch, Dispatcher, MessageHandler};
pub use crate::error::{ConfigError, Error, Result};
pub use crate::event::InboundEvent;
pub use crate::handshake::{Credentials, Target};
pub use crate::reconnect::ReconnectPolicy;
pub use crate::state::{CloseOutcome, ConnectionState, StateMachine};

// Re-export commonly used external dependencies
pub use std::time::Duration;
pub use url::Url;
