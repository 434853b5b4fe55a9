//! Tether Client
//!
//! Native WebSocket client with token handshake, keepalives and automatic
//! reconnect.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether_client::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder()
//!         .heartbeat(Duration::from_secs(20))
//!         .auto_reconnect(Duration::from_secs(5))
//!         .build()?;
//!
//!     client.set_message_callback(|msg| println!("Received: {msg}"));
//!     client.connect("wss://chat.example.com/ws", "token", "im_app_android").await?;
//!
//!     client.send("Hello, Tether!").await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/tether-client/")]

// Public modules
pub mod client;
pub mod config;
pub mod heartbeat;
pub mod transport;

// Prelude module
pub mod prelude;

// Re-export key types for convenience
pub use client::{Client, ClientBuilder, MessageCallback, StateListener};
pub use config::{ClientConfig, HeartbeatConfig, ReconnectConfig, TlsConfig};
pub use transport::{
    Handshake, HostConnector, HostEvents, HostSocket, HostTransport, Link, LinkWriter,
    SocketTransport, Transport,
};
