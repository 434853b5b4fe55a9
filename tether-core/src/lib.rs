//! # Tether Core
//!
//! Runtime-free building blocks shared by every Tether host:
//!
//! - Error kinds and the `Result` alias
//! - The connection state machine (atomic, compare-and-swap transitions)
//! - Client configuration, heartbeat and reconnect settings
//! - The reconnect policy
//! - Handshake metadata (credentials as headers or query parameters)
//! - The inbound event type and the single-slot message dispatcher
//! - Logging macros
//!
//! Nothing here spawns tasks or touches a socket; the native client and the
//! browser client drive these pieces from their own event loops.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/tether-core/")]

// Core modules
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod handshake;
pub mod logging;
pub mod reconnect;
pub mod state;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use config::{ClientConfig, HeartbeatConfig, ReconnectConfig};
pub use dispatch::{Dispatch, Dispatcher, MessageHandler};
pub use error::{ConfigError, Error, Result};
pub use event::InboundEvent;
pub use handshake::{Credentials, Target};
pub use reconnect::ReconnectPolicy;
pub use state::{CloseOutcome, ConnectionState, StateMachine};
