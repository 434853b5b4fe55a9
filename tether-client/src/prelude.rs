//! Prelude module for Tether Client
//!
//! This module re-exports commonly used types and traits to make them
//! easily accessible for users of the client library.

pub use crate::client::{Client, ClientBuilder};
pub use crate::config::TlsConfig;
pub use crate::transport::{HostConnector, HostEvents, HostSocket, HostTransport, SocketTransport, Transport};

// Re-export core types for convenience
pub use tether_core::prelude::*;
