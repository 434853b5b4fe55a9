//! # Tether
//!
//! **One WebSocket client state machine for native, embedded and browser hosts**
//!
//! Tether keeps a single long-lived WebSocket connection to a server that
//! authenticates with a token and a device type. It tracks the connection
//! state, sends periodic keepalives, reconnects after unexpected drops and
//! hands every inbound text payload to one registered callback.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder()
//!         .heartbeat(Duration::from_secs(20))
//!         .auto_reconnect(Duration::from_secs(5))
//!         .build()?;
//!
//!     client.set_message_callback(|msg| println!("received: {msg}"));
//!     client.set_state_listener(|state| println!("state: {state}"));
//!
//!     client.connect("wss://chat.example.com/ws", "token", "desktop").await?;
//!     client.send("hello").await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `client` (default): native tokio client
//! - `wasm`: browser client exported through `wasm-bindgen`
//! - `ffi`: C ABI over a process-wide client
//! - `logging` (default): `tracing` output
//! - `metrics`: connection counters through `metrics`
//! - `serde`: (de)serializable configuration

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/tether/")]

// Re-export core components
pub use tether_core::*;

#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub use tether_client as client;

#[cfg(feature = "client")]
pub use tether_client::{Client, ClientBuilder, TlsConfig};

#[cfg(feature = "wasm")]
#[cfg_attr(docsrs, doc(cfg(feature = "wasm")))]
pub use tether_wasm as wasm;

#[cfg(feature = "ffi")]
#[cfg_attr(docsrs, doc(cfg(feature = "ffi")))]
pub use tether_ffi as ffi;

/// Prelude module with common imports
pub mod prelude {
    pub use tether_core::prelude::*;

    #[cfg(feature = "client")]
    pub use tether_client::prelude::*;

    #[cfg(feature = "wasm")]
    pub use tether_wasm::prelude::*;
}
