//! Transport bindings
//!
//! A [`Transport`] turns a [`Target`] into a live [`Link`]: a writer for
//! outbound text and an ordered stream of [`InboundEvent`]s. Two variants
//! exist and are picked when the client is built:
//!
//! - [`SocketTransport`] owns the socket and completes the handshake inside
//!   `open`.
//! - [`HostTransport`] asks an embedding runtime for a socket and returns as
//!   soon as its event handlers are attached; the runtime reports handshake
//!   completion later with an `Opened` event.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use tether_core::{ClientConfig, InboundEvent, Result, Target};

pub mod host;
pub mod socket;

pub use host::{HostConnector, HostEvents, HostSocket, HostTransport};
pub use socket::SocketTransport;

/// Ordered inbound events of one binding
pub type InboundStream = BoxStream<'static, InboundEvent>;

/// Writing half of a live binding
#[async_trait]
pub trait LinkWriter: Send + Sync {
    /// Send a text frame
    async fn send_text(&self, payload: String) -> Result<()>;

    /// Close the binding; closing twice is a successful no-op
    async fn close(&self) -> Result<()>;
}

/// How far the handshake got when `open` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// The binding is usable right away
    Complete,
    /// The host will push `InboundEvent::Opened` when it is usable
    Pending,
}

/// A freshly opened binding
pub struct Link {
    /// Outbound half
    pub writer: Arc<dyn LinkWriter>,
    /// Inbound half
    pub inbound: InboundStream,
    /// Handshake progress
    pub handshake: Handshake,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("handshake", &self.handshake)
            .finish_non_exhaustive()
    }
}

/// Connection factory
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a binding to `target`, honouring `config.handshake_timeout`
    async fn open(&self, target: &Target, config: &ClientConfig) -> Result<Link>;
}
