//! Self-driven transport
//!
//! Opens the socket with `tokio-tungstenite`, sends the credentials as
//! handshake headers and splits the stream into a locked sink for writers and
//! a translated event stream for the read loop.

use super::{Handshake, InboundStream, Link, LinkWriter, Transport};
use crate::config::TlsConfig;
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{future, SinkExt, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{log_debug, ClientConfig, Error, InboundEvent, Result, Target};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on flushing the close frame to an unresponsive peer
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Transport that owns its socket
#[derive(Clone, Default)]
pub struct SocketTransport {
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl SocketTransport {
    /// Transport using the built-in webpki roots for `wss://`
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport using a custom TLS setup for `wss://`
    pub fn with_tls(tls: &TlsConfig) -> Result<Self> {
        Ok(Self {
            tls: Some(Arc::new(tls.build()?)),
        })
    }
}

impl fmt::Debug for SocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketTransport")
            .field("custom_tls", &self.tls.is_some())
            .finish()
    }
}

#[async_trait]
impl Transport for SocketTransport {
    #[cfg_attr(feature = "logging", tracing::instrument(skip_all, fields(url = %target.url())))]
    async fn open(&self, target: &Target, config: &ClientConfig) -> Result<Link> {
        let address = target.url().as_str();
        let mut request = address
            .into_client_request()
            .map_err(|e| Error::invalid_address(address, e))?;
        request
            .headers_mut()
            .extend(target.handshake_headers(config)?);

        let connector = if target.is_secure() {
            self.tls.clone().map(Connector::Rustls)
        } else {
            None
        };
        let timeout = config.handshake_timeout;
        let connect = connect_async_tls_with_config(request, None, true, connector);

        let (socket, response) = match tokio::time::timeout(timeout, connect).await {
            Err(_) => return Err(Error::ConnectTimeout { timeout }),
            Ok(Err(e)) => return Err(connect_error(address, e)),
            Ok(Ok(pair)) => pair,
        };
        log_debug!("handshake completed with status {}", response.status());

        let (sink, stream) = socket.split();
        let inbound: InboundStream = stream
            .filter_map(|item| future::ready(translate(item)))
            .boxed();

        Ok(Link {
            writer: Arc::new(SocketWriter {
                sink: Mutex::new(sink),
                closed: AtomicBool::new(false),
            }),
            inbound,
            handshake: Handshake::Complete,
        })
    }
}

struct SocketWriter {
    sink: Mutex<SplitSink<Socket, Message>>,
    closed: AtomicBool,
}

#[async_trait]
impl LinkWriter for SocketWriter {
    async fn send_text(&self, payload: String) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(payload)).await.map_err(write_error)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) | Ok(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => Ok(()),
            Ok(Err(e)) => Err(Error::WriteFailed(e.to_string())),
            Err(_) => Err(Error::WriteFailed(format!(
                "close frame not flushed within {CLOSE_TIMEOUT:?}"
            ))),
        }
    }
}

fn connect_error(address: &str, error: WsError) -> Error {
    match error {
        WsError::Http(response) => {
            let (parts, _body) = response.into_parts();
            Error::ConnectRejected {
                status: parts.status,
                headers: parts.headers,
            }
        }
        WsError::Url(e) => Error::invalid_address(address, e),
        other => Error::ConnectFailed(other.to_string()),
    }
}

fn write_error(error: WsError) -> Error {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => Error::NotConnected,
        other => Error::WriteFailed(other.to_string()),
    }
}

fn translate(item: std::result::Result<Message, WsError>) -> Option<InboundEvent> {
    match item {
        Ok(Message::Text(text)) => Some(InboundEvent::Message(text)),
        Ok(Message::Binary(data)) => Some(InboundEvent::from_bytes(&data)),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Ok(Message::Close(frame)) => Some(match frame {
            Some(frame) => InboundEvent::Closed {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.into_owned(),
            },
            None => InboundEvent::Closed {
                code: None,
                reason: String::new(),
            },
        }),
        Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Some(InboundEvent::Closed {
            code: None,
            reason: String::new(),
        }),
        Err(e) => Some(InboundEvent::Error(e.to_string())),
    }
}
