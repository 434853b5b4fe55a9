//! Client facade
//!
//! [`Client`] owns one connection at a time. `connect`, `send` and `close`
//! are serialized by a per-client session lock; the state itself is an atomic
//! cell so [`Client::state`] never waits. Once a binding is open a supervisor
//! task drains its inbound events in order, hands payloads to the registered
//! callback and, when the binding is lost, either retries on the configured
//! schedule or settles in `Disconnected`.
//!
//! State listeners are invoked from a dedicated task, in transition order and
//! never while the session lock is held, so a listener may call back into the
//! client.

use crate::config::{ClientConfig, TlsConfig};
use crate::heartbeat::Heartbeat;
use crate::transport::{Handshake, InboundStream, Link, LinkWriter, SocketTransport, Transport};
use futures_util::StreamExt;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tether_core::{
    log_debug, log_error, log_info, log_warn, CloseOutcome, ConnectionState, Credentials,
    Dispatcher, Error, InboundEvent, ReconnectPolicy, Result, Target,
};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Callback receiving each inbound payload
pub type MessageCallback = dyn Fn(&str) + Send + Sync;

/// Callback receiving each state change
pub type StateListener = dyn Fn(ConnectionState) + Send + Sync;

type ListenerSlot = Arc<Mutex<Option<Arc<StateListener>>>>;

thread_local! {
    // set while a message callback runs on this thread
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

/// WebSocket client with heartbeat and automatic reconnect
///
/// Cloning is cheap; clones share the same connection. Dropping the last
/// handle closes the connection. A callback that captures a `Client` keeps it
/// alive until `close` is called.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
    _owner: Arc<Owner>,
}

impl Client {
    /// Create a client using the self-driven socket transport
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_transport(config, SocketTransport::new())
    }

    /// Create a client over a custom transport
    pub fn with_transport(config: ClientConfig, transport: impl Transport) -> Result<Self> {
        Self::from_parts(config, Box::new(transport))
    }

    /// Start building a client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    fn from_parts(config: ClientConfig, transport: Box<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            config,
            transport,
            state: tether_core::StateMachine::new(),
            dispatcher: Dispatcher::new(),
            listener: Arc::new(Mutex::new(None)),
            notifier: OnceLock::new(),
            session: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
        });
        Ok(Self {
            _owner: Arc::new(Owner {
                shared: shared.clone(),
            }),
            shared,
        })
    }

    /// Open a connection to `address`.
    ///
    /// `token` and `client_type` are sent as handshake headers (or query
    /// parameters for host-driven transports). An empty `client_type` falls
    /// back to the default device type. Fails with [`Error::InvalidState`]
    /// unless the client is `Disconnected`.
    #[cfg_attr(feature = "logging", tracing::instrument(skip(self, token)))]
    pub async fn connect(&self, address: &str, token: &str, client_type: &str) -> Result<()> {
        let target = Arc::new(Target::parse(
            address,
            Credentials::new(token, client_type),
        )?);
        let shared = &self.shared;

        let (shutdown_tx, mut shutdown) = oneshot::channel();
        let id = {
            let mut slot = shared.session.lock().await;
            shared
                .state
                .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
                .map_err(|state| Error::InvalidState { state })?;
            shared.emit(ConnectionState::Connecting);

            let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
            *slot = Some(Session::new(id, shutdown_tx));
            id
        };
        log_info!("connecting to {}", target.url());

        let opened = tokio::select! {
            biased;
            _ = &mut shutdown => return Err(Error::Aborted),
            result = shared.transport.open(&target, &shared.config) => result,
        };

        let link = match opened {
            Ok(link) => link,
            Err(err) => {
                log_warn!("connect to {} failed: {}", target.url(), err);
                let mut slot = shared.session.lock().await;
                if slot.as_ref().is_some_and(|s| s.id == id) {
                    shared.end(&mut slot);
                }
                return Err(err);
            }
        };

        let Link {
            writer,
            inbound,
            handshake,
        } = link;

        let mut slot = shared.session.lock().await;
        let Some(session) = slot.as_mut().filter(|s| s.id == id) else {
            drop(slot);
            let _ = writer.close().await;
            return Err(Error::Aborted);
        };
        session.writer = Some(writer);
        if handshake == Handshake::Complete {
            shared.establish(session);
        }
        session.supervisor = Some(tokio::spawn(shared.clone().supervise(
            id,
            target,
            inbound,
            handshake,
            shutdown,
        )));
        Ok(())
    }

    /// Send a text message on the live connection
    pub async fn send(&self, message: impl Into<String>) -> Result<()> {
        let writer = {
            let slot = self.shared.session.lock().await;
            if self.shared.state.current() != ConnectionState::Connected {
                return Err(Error::NotConnected);
            }
            slot.as_ref()
                .and_then(|s| s.writer.clone())
                .ok_or(Error::NotConnected)?
        };

        writer.send_text(message.into()).await?;

        #[cfg(feature = "metrics")]
        metrics::counter!("tether_client_messages_sent_total").increment(1);

        Ok(())
    }

    /// Close the connection and stop every background task.
    ///
    /// Closing a client that holds no connection returns
    /// [`CloseOutcome::AlreadyClosed`]. Once this returns no keepalive is sent
    /// and, unless called from inside the message callback, no further payload
    /// is dispatched.
    #[cfg_attr(feature = "logging", tracing::instrument(skip(self)))]
    pub async fn close(&self) -> Result<CloseOutcome> {
        let mut session = {
            let mut slot = self.shared.session.lock().await;
            let Some(session) = slot.take() else {
                return Ok(CloseOutcome::AlreadyClosed);
            };
            if self.shared.state.reset() != ConnectionState::Disconnected {
                self.shared.emit(ConnectionState::Disconnected);
            }
            session
        };

        if let Some(shutdown) = session.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(heartbeat) = session.heartbeat.take() {
            heartbeat.stop().await;
        }
        if let Some(writer) = session.writer.take() {
            if let Err(e) = writer.close().await {
                log_warn!("closing connection: {}", e);
            }
        }
        if let Some(supervisor) = session.supervisor.take() {
            // the supervisor is the caller's own stack when closing from the callback
            if !DISPATCHING.with(Cell::get) {
                let _ = supervisor.await;
            }
        }

        log_info!("connection closed");
        Ok(CloseOutcome::Closed)
    }

    /// Register the message callback, replacing any previous one
    pub fn set_message_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared.dispatcher.set_handler(Arc::new(callback));
    }

    /// Remove the message callback; later payloads are dropped
    pub fn clear_message_callback(&self) {
        self.shared.dispatcher.clear_handler();
    }

    /// Register the state listener, replacing any previous one
    pub fn set_state_listener<F>(&self, listener: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        *lock(&self.shared.listener) = Some(Arc::new(listener));
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.state.current()
    }

    /// Whether the client is `Connected`
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("dispatcher", &self.shared.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`]
pub struct ClientBuilder {
    config: ClientConfig,
    tls: Option<TlsConfig>,
    transport: Option<Box<dyn Transport>>,
}

impl ClientBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            tls: None,
            transport: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.handshake_timeout(timeout);
        self
    }

    /// Enable keepalives at `interval`
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.config = self.config.heartbeat(interval);
        self
    }

    /// Enable reconnect with a fixed `interval`
    pub fn auto_reconnect(mut self, interval: Duration) -> Self {
        self.config = self.config.auto_reconnect(interval);
        self
    }

    /// Cap reconnect attempts per disconnect episode
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config = self.config.max_reconnect_attempts(attempts);
        self
    }

    /// Use a custom TLS trust setup for the socket transport
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Use a custom transport
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Build the client
    pub fn build(self) -> Result<Client> {
        let transport: Box<dyn Transport> = match (self.transport, self.tls) {
            (Some(transport), _) => transport,
            (None, Some(tls)) => Box::new(SocketTransport::with_tls(&tls)?),
            (None, None) => Box::new(SocketTransport::new()),
        };
        Client::from_parts(self.config, transport)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("tls", &self.tls)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

/// Shuts the session down once every `Client` handle is gone.
///
/// The supervisor task holds `Shared`, so `Shared` itself is never dropped
/// while a session runs.
struct Owner {
    shared: Arc<Shared>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.shared.session.try_lock() {
            self.shared.abandon(&mut slot);
            return;
        }
        if let Ok(handle) = Handle::try_current() {
            let shared = self.shared.clone();
            handle.spawn(async move {
                let mut slot = shared.session.lock().await;
                shared.abandon(&mut slot);
            });
        }
    }
}

struct Shared {
    config: ClientConfig,
    transport: Box<dyn Transport>,
    state: tether_core::StateMachine,
    dispatcher: Dispatcher<MessageCallback>,
    listener: ListenerSlot,
    notifier: OnceLock<mpsc::UnboundedSender<ConnectionState>>,
    session: tokio::sync::Mutex<Option<Session>>,
    next_id: AtomicU64,
}

/// One connect call's worth of resources, including its reconnects
struct Session {
    id: u64,
    writer: Option<Arc<dyn LinkWriter>>,
    heartbeat: Option<Heartbeat>,
    shutdown: Option<oneshot::Sender<()>>,
    supervisor: Option<JoinHandle<()>>,
}

impl Session {
    fn new(id: u64, shutdown: oneshot::Sender<()>) -> Self {
        Self {
            id,
            writer: None,
            heartbeat: None,
            shutdown: Some(shutdown),
            supervisor: None,
        }
    }
}

enum Exit {
    Shutdown,
    Lost(Error),
}

impl Shared {
    /// Queue a state change for the listener task; call with the session lock held
    fn emit(&self, state: ConnectionState) {
        let notifier = self.notifier.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(notify_listener(rx, self.listener.clone()));
            tx
        });
        let _ = notifier.send(state);
    }

    /// Drop the session and force `Disconnected`
    fn end(&self, slot: &mut Option<Session>) {
        *slot = None;
        if self.state.reset() != ConnectionState::Disconnected {
            self.emit(ConnectionState::Disconnected);
        }
    }

    /// Tear the session down without waiting on its tasks
    fn abandon(&self, slot: &mut Option<Session>) {
        let Some(mut session) = slot.take() else {
            return;
        };
        log_debug!("last client handle dropped, closing connection");
        if self.state.reset() != ConnectionState::Disconnected {
            self.emit(ConnectionState::Disconnected);
        }

        if let Some(shutdown) = session.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(heartbeat) = session.heartbeat.take() {
            heartbeat.cancel();
        }
        if let Some(writer) = session.writer.take() {
            if let Ok(handle) = Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = writer.close().await {
                        log_debug!("closing abandoned connection: {}", e);
                    }
                });
            }
        }
    }

    /// Handshake done: go `Connected` and start keepalives
    fn establish(&self, session: &mut Session) {
        if self
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
            .is_err()
        {
            return;
        }
        self.emit(ConnectionState::Connected);
        log_info!("connection established");

        if let Some(writer) = &session.writer {
            session.heartbeat = Heartbeat::start(writer.clone(), &self.config.heartbeat);
        }
    }

    fn deliver(&self, payload: &str) {
        #[cfg(feature = "metrics")]
        metrics::counter!("tether_client_messages_received_total").increment(1);

        DISPATCHING.with(|flag| flag.set(true));
        self.dispatcher.dispatch(payload);
        DISPATCHING.with(|flag| flag.set(false));
    }

    async fn supervise(
        self: Arc<Self>,
        id: u64,
        target: Arc<Target>,
        mut inbound: InboundStream,
        mut handshake: Handshake,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut episode: Option<ReconnectPolicy> = None;
        loop {
            let lost = match self
                .read_loop(id, &mut inbound, handshake, &mut shutdown)
                .await
            {
                Exit::Shutdown => return,
                Exit::Lost(err) => err,
            };
            log_warn!("connection to {} lost: {}", target.url(), lost);

            let Some(mut policy) = self.teardown(id, &lost, episode.take()).await else {
                return;
            };
            let Some((next, next_handshake)) = self
                .reconnect(id, &target, &mut policy, &mut shutdown)
                .await
            else {
                return;
            };
            inbound = next;
            handshake = next_handshake;
            episode = Some(policy);
        }
    }

    async fn read_loop(
        &self,
        id: u64,
        inbound: &mut InboundStream,
        handshake: Handshake,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Exit {
        let timeout = self.config.handshake_timeout;
        let mut deadline = (handshake == Handshake::Pending).then(|| Instant::now() + timeout);

        loop {
            let event = tokio::select! {
                biased;
                _ = &mut *shutdown => return Exit::Shutdown,
                _ = expire(deadline) => return Exit::Lost(Error::ConnectTimeout { timeout }),
                event = inbound.next() => event,
            };

            match event {
                Some(InboundEvent::Message(payload)) => self.deliver(&payload),
                Some(InboundEvent::Opened) => {
                    deadline = None;
                    let mut slot = self.session.lock().await;
                    match slot.as_mut().filter(|s| s.id == id) {
                        Some(session) => self.establish(session),
                        None => return Exit::Shutdown,
                    }
                }
                Some(event) => return Exit::Lost(Error::ReadFailed(event.describe())),
                None => {
                    return Exit::Lost(Error::ReadFailed("connection stream ended".to_string()))
                }
            }
        }
    }

    /// Release a lost binding and pick the next state.
    ///
    /// Returns the retry policy when the session moved to `Reconnecting`. A
    /// binding that never reached `Connected` continues the `carried` episode
    /// instead of starting a fresh attempt budget.
    async fn teardown(
        &self,
        id: u64,
        lost: &Error,
        carried: Option<ReconnectPolicy>,
    ) -> Option<ReconnectPolicy> {
        let mut slot = self.session.lock().await;
        let session = slot.as_mut().filter(|s| s.id == id)?;
        let heartbeat = session.heartbeat.take();
        let writer = session.writer.take();

        let from = self.state.current();
        let policy = if !lost.is_recoverable() {
            None
        } else if from == ConnectionState::Connected {
            ReconnectPolicy::from_config(&self.config.reconnect)
        } else {
            carried.or_else(|| ReconnectPolicy::from_config(&self.config.reconnect))
        };

        let policy = match policy {
            Some(policy)
                if matches!(
                    from,
                    ConnectionState::Connecting | ConnectionState::Connected
                ) && self
                    .state
                    .transition(from, ConnectionState::Reconnecting)
                    .is_ok() =>
            {
                self.emit(ConnectionState::Reconnecting);
                Some(policy)
            }
            _ => {
                self.end(&mut slot);
                None
            }
        };
        drop(slot);

        if let Some(heartbeat) = heartbeat {
            heartbeat.stop().await;
        }
        if let Some(writer) = writer {
            if let Err(e) = writer.close().await {
                log_debug!("closing lost binding: {}", e);
            }
        }
        policy
    }

    /// Retry until a binding opens, the budget runs out or the session ends
    async fn reconnect(
        &self,
        id: u64,
        target: &Target,
        policy: &mut ReconnectPolicy,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Option<(InboundStream, Handshake)> {
        loop {
            let Some(delay) = policy.next_delay() else {
                log_warn!(
                    "giving up on {} after {} reconnect attempts",
                    target.url(),
                    policy.attempts()
                );
                let mut slot = self.session.lock().await;
                if slot.as_ref().is_some_and(|s| s.id == id) {
                    self.end(&mut slot);
                }
                return None;
            };

            tokio::select! {
                biased;
                _ = &mut *shutdown => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            {
                let slot = self.session.lock().await;
                if !slot.as_ref().is_some_and(|s| s.id == id) {
                    return None;
                }
                self.state
                    .transition(ConnectionState::Reconnecting, ConnectionState::Connecting)
                    .ok()?;
                self.emit(ConnectionState::Connecting);
            }

            #[cfg(feature = "metrics")]
            metrics::counter!("tether_client_reconnect_attempts_total").increment(1);
            log_info!("reconnect attempt {} to {}", policy.attempts(), target.url());

            let opened = tokio::select! {
                biased;
                _ = &mut *shutdown => return None,
                result = self.transport.open(target, &self.config) => result,
            };

            let mut slot = self.session.lock().await;
            match opened {
                Ok(link) => {
                    let Link {
                        writer,
                        inbound,
                        handshake,
                    } = link;
                    let Some(session) = slot.as_mut().filter(|s| s.id == id) else {
                        drop(slot);
                        let _ = writer.close().await;
                        return None;
                    };
                    session.writer = Some(writer);
                    if handshake == Handshake::Complete {
                        self.establish(session);
                    }
                    return Some((inbound, handshake));
                }
                Err(err) => {
                    log_warn!("reconnect attempt {} failed: {}", policy.attempts(), err);
                    if !slot.as_ref().is_some_and(|s| s.id == id) {
                        return None;
                    }
                    if !err.is_recoverable() {
                        self.end(&mut slot);
                        return None;
                    }
                    self.state
                        .transition(ConnectionState::Connecting, ConnectionState::Reconnecting)
                        .ok()?;
                    self.emit(ConnectionState::Reconnecting);
                }
            }
        }
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn notify_listener(mut rx: mpsc::UnboundedReceiver<ConnectionState>, listener: ListenerSlot) {
    while let Some(state) = rx.recv().await {
        let current = lock(&listener).clone();
        let Some(listener) = current else {
            continue;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
            log_error!("state listener panicked on {}", state);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // listeners never run under this lock
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
