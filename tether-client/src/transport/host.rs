//! Host-driven transport
//!
//! For runtimes that own the socket themselves (a JavaScript engine, a mobile
//! platform socket). The host creates the socket from the query-string URL and
//! reports what happens on it through [`HostEvents`]; the client consumes those
//! events in the order they were pushed.

use super::{Handshake, InboundStream, Link, LinkWriter, Transport};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tether_core::{log_debug, ClientConfig, Error, InboundEvent, Result, Target};
use tokio::sync::mpsc;
use url::Url;

/// A socket owned by the embedding runtime
pub trait HostSocket: Send + Sync {
    /// Queue a text frame
    fn send_text(&self, payload: &str) -> std::result::Result<(), String>;

    /// Start closing the socket
    fn close(&self);
}

/// Creates host sockets
pub trait HostConnector: Send + Sync + 'static {
    /// Create a socket for `url` and attach `events` to it.
    ///
    /// Returning an error means the socket could not even be created; handshake
    /// failures are reported later through `events`.
    fn connect(
        &self,
        url: &Url,
        events: HostEvents,
    ) -> std::result::Result<Box<dyn HostSocket>, String>;
}

/// Event sink handed to the host for one socket
///
/// Every method returns `false` once the client has stopped listening to this
/// socket, after which the host may drop it.
#[derive(Clone)]
pub struct HostEvents {
    tx: mpsc::UnboundedSender<InboundEvent>,
}

impl HostEvents {
    /// The handshake completed
    pub fn opened(&self) -> bool {
        self.push(InboundEvent::Opened)
    }

    /// A text payload arrived
    pub fn message(&self, payload: impl Into<String>) -> bool {
        self.push(InboundEvent::Message(payload.into()))
    }

    /// A binary payload arrived
    pub fn binary(&self, payload: &[u8]) -> bool {
        self.push(InboundEvent::from_bytes(payload))
    }

    /// The socket failed
    pub fn error(&self, reason: impl Into<String>) -> bool {
        self.push(InboundEvent::Error(reason.into()))
    }

    /// The socket closed
    pub fn closed(&self, code: Option<u16>, reason: impl Into<String>) -> bool {
        self.push(InboundEvent::Closed {
            code,
            reason: reason.into(),
        })
    }

    fn push(&self, event: InboundEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

impl fmt::Debug for HostEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostEvents")
            .field("listening", &!self.tx.is_closed())
            .finish()
    }
}

/// Transport backed by a [`HostConnector`]
#[derive(Debug, Clone)]
pub struct HostTransport<C> {
    connector: C,
}

impl<C: HostConnector> HostTransport<C> {
    /// Wrap a host connector
    pub fn new(connector: C) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl<C: HostConnector> Transport for HostTransport<C> {
    async fn open(&self, target: &Target, _config: &ClientConfig) -> Result<Link> {
        // hosts cannot set handshake headers, so credentials ride in the query
        let url = target.query_url();
        let (tx, rx) = mpsc::unbounded_channel();
        let socket = self
            .connector
            .connect(&url, HostEvents { tx })
            .map_err(Error::ConnectFailed)?;
        log_debug!("host socket created for {}", target.url());

        let inbound: InboundStream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed();

        Ok(Link {
            writer: Arc::new(HostWriter {
                socket,
                closed: AtomicBool::new(false),
            }),
            inbound,
            handshake: Handshake::Pending,
        })
    }
}

struct HostWriter {
    socket: Box<dyn HostSocket>,
    closed: AtomicBool,
}

#[async_trait]
impl LinkWriter for HostWriter {
    async fn send_text(&self, payload: String) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }
        self.socket.send_text(&payload).map_err(Error::WriteFailed)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.socket.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tether_core::Credentials;

    #[derive(Default)]
    struct Recorder {
        urls: Mutex<Vec<String>>,
        events: Mutex<Option<HostEvents>>,
        sent: Arc<Mutex<Vec<String>>>,
        closes: Arc<Mutex<u32>>,
    }

    struct RecordedSocket {
        sent: Arc<Mutex<Vec<String>>>,
        closes: Arc<Mutex<u32>>,
    }

    impl HostSocket for RecordedSocket {
        fn send_text(&self, payload: &str) -> std::result::Result<(), String> {
            self.sent.lock().unwrap().push(payload.to_string());
            Ok(())
        }

        fn close(&self) {
            *self.closes.lock().unwrap() += 1;
        }
    }

    impl HostConnector for Arc<Recorder> {
        fn connect(
            &self,
            url: &Url,
            events: HostEvents,
        ) -> std::result::Result<Box<dyn HostSocket>, String> {
            self.urls.lock().unwrap().push(url.to_string());
            *self.events.lock().unwrap() = Some(events);
            Ok(Box::new(RecordedSocket {
                sent: self.sent.clone(),
                closes: self.closes.clone(),
            }))
        }
    }

    struct Refusing;

    impl HostConnector for Refusing {
        fn connect(
            &self,
            _url: &Url,
            _events: HostEvents,
        ) -> std::result::Result<Box<dyn HostSocket>, String> {
            Err("sockets unavailable".to_string())
        }
    }

    fn target() -> Target {
        Target::parse(
            "ws://example.com/ws",
            Credentials::new("tok", "im_app_ios"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_uses_query_credentials() {
        let recorder = Arc::new(Recorder::default());
        let transport = HostTransport::new(recorder.clone());
        let link = transport
            .open(&target(), &ClientConfig::default())
            .await
            .unwrap();

        assert_eq!(link.handshake, Handshake::Pending);
        assert_eq!(
            *recorder.urls.lock().unwrap(),
            vec!["ws://example.com/ws?token=tok&deviceType=im_app_ios"]
        );
    }

    #[tokio::test]
    async fn test_events_arrive_in_push_order() {
        let recorder = Arc::new(Recorder::default());
        let transport = HostTransport::new(recorder.clone());
        let mut link = transport
            .open(&target(), &ClientConfig::default())
            .await
            .unwrap();

        let events = recorder.events.lock().unwrap().clone().unwrap();
        assert!(events.opened());
        assert!(events.message("m1"));
        assert!(events.binary(b"m2"));
        assert!(events.closed(Some(1000), "done"));

        assert_eq!(link.inbound.next().await, Some(InboundEvent::Opened));
        assert_eq!(
            link.inbound.next().await,
            Some(InboundEvent::Message("m1".into()))
        );
        assert_eq!(
            link.inbound.next().await,
            Some(InboundEvent::Message("m2".into()))
        );
        assert!(link.inbound.next().await.unwrap().is_terminal());

        drop(link);
        assert!(!events.message("late"));
    }

    #[tokio::test]
    async fn test_writer_close_is_idempotent() {
        let recorder = Arc::new(Recorder::default());
        let transport = HostTransport::new(recorder.clone());
        let link = transport
            .open(&target(), &ClientConfig::default())
            .await
            .unwrap();

        link.writer.send_text("hello".into()).await.unwrap();
        link.writer.close().await.unwrap();
        link.writer.close().await.unwrap();
        assert!(matches!(
            link.writer.send_text("late".into()).await,
            Err(Error::NotConnected)
        ));

        assert_eq!(*recorder.sent.lock().unwrap(), vec!["hello"]);
        assert_eq!(*recorder.closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_connector_failure_is_connect_failed() {
        let err = HostTransport::new(Refusing)
            .open(&target(), &ClientConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectFailed(ref reason) if reason == "sockets unavailable"));
    }
}
