//! Browser WebSocket client
//!
//! Drives the core state machine from browser socket events. The socket and
//! timer callbacks are created once per client and reused for every socket,
//! so a callback never frees itself while it runs. Events from a socket that
//! is no longer current are ignored.

use crate::options::BrowserOptions;
use js_sys::{ArrayBuffer, Function, Uint8Array};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tether_core::{
    log_debug, log_error, log_warn, ClientConfig, ConnectionState, Credentials, Dispatcher, Error,
    MessageHandler, ReconnectPolicy, StateMachine, Target,
};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{BinaryType, CloseEvent, Event, MessageEvent, WebSocket};

/// WebSocket client for browsers
#[wasm_bindgen]
pub struct BrowserClient {
    inner: Rc<Inner>,
}

#[wasm_bindgen]
impl BrowserClient {
    /// Create a client; throws when the options are invalid
    #[wasm_bindgen(constructor)]
    pub fn new(options: Option<BrowserOptions>) -> Result<BrowserClient, JsValue> {
        let options = options.unwrap_or_default();
        let config = options
            .to_config()
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(BrowserClient {
            inner: Inner::new(config, options.debug()),
        })
    }

    /// Start connecting; the credentials travel as query parameters.
    ///
    /// Returns `false` when the socket could not be created or the client is
    /// not disconnected; see `lastError()` for the reason.
    pub fn connect(&self, url: &str, token: &str, device_type: Option<String>) -> bool {
        self.inner
            .connect(url, token, device_type.as_deref().unwrap_or_default())
    }

    /// Send a text message; `false` unless connected
    pub fn send(&self, message: &str) -> bool {
        self.inner.send(message)
    }

    /// Close the connection and cancel timers.
    ///
    /// Always `true`; closing an already closed client is a no-op.
    pub fn close(&self) -> bool {
        self.inner.close()
    }

    /// Receive each inbound message as a string; `null` clears
    #[wasm_bindgen(js_name = setMessageCallback)]
    pub fn set_message_callback(&self, callback: Option<Function>) {
        match callback {
            Some(callback) => {
                self.inner
                    .dispatcher
                    .set_handler(std::sync::Arc::new(JsHandler(callback)));
            }
            None => {
                self.inner.dispatcher.clear_handler();
            }
        }
    }

    /// Receive each state change as a number (0 to 3)
    #[wasm_bindgen(js_name = setStateChangeHandler)]
    pub fn set_state_change_handler(&self, handler: Option<Function>) {
        *self.inner.on_state.borrow_mut() = handler;
    }

    /// Receive socket error events
    #[wasm_bindgen(js_name = setErrorHandler)]
    pub fn set_error_handler(&self, handler: Option<Function>) {
        *self.inner.on_error.borrow_mut() = handler;
    }

    /// Receive `(code, reason)` when the socket closes
    #[wasm_bindgen(js_name = setCloseHandler)]
    pub fn set_close_handler(&self, handler: Option<Function>) {
        *self.inner.on_close.borrow_mut() = handler;
    }

    /// Current state: 0 disconnected, 1 connecting, 2 connected, 3 reconnecting
    #[wasm_bindgen(getter)]
    pub fn state(&self) -> u8 {
        self.inner.state.current().as_u8()
    }

    #[wasm_bindgen(js_name = isConnected)]
    pub fn is_connected(&self) -> bool {
        self.inner.state.current() == ConnectionState::Connected
    }

    /// Reason for the last failed call or connection loss
    #[wasm_bindgen(js_name = lastError)]
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.borrow().clone()
    }
}

impl Drop for BrowserClient {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl fmt::Debug for BrowserClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserClient")
            .field("state", &self.inner.state.current())
            .field("dispatcher", &self.inner.dispatcher)
            .finish_non_exhaustive()
    }
}

struct JsHandler(Function);

impl MessageHandler for JsHandler {
    fn on_message(&self, payload: &str) {
        if let Err(e) = self.0.call1(&JsValue::NULL, &JsValue::from_str(payload)) {
            log_error!("message callback threw: {}", describe(&e));
        }
    }
}

struct Inner {
    config: ClientConfig,
    debug: bool,
    state: StateMachine,
    dispatcher: Dispatcher<JsHandler>,
    on_state: RefCell<Option<Function>>,
    on_error: RefCell<Option<Function>>,
    on_close: RefCell<Option<Function>>,
    socket: RefCell<Option<WebSocket>>,
    target: RefCell<Option<Target>>,
    policy: RefCell<Option<ReconnectPolicy>>,
    heartbeat_timer: Cell<Option<i32>>,
    retry_timer: Cell<Option<i32>>,
    handshake_timer: Cell<Option<i32>>,
    last_error: RefCell<Option<String>>,
    callbacks: Callbacks,
}

struct Callbacks {
    open: Closure<dyn FnMut(Event)>,
    message: Closure<dyn FnMut(MessageEvent)>,
    error: Closure<dyn FnMut(Event)>,
    close: Closure<dyn FnMut(CloseEvent)>,
    heartbeat: Closure<dyn FnMut()>,
    retry: Closure<dyn FnMut()>,
    handshake_expired: Closure<dyn FnMut()>,
}

impl Callbacks {
    fn new(weak: &Weak<Inner>) -> Self {
        let open = {
            let weak = weak.clone();
            Closure::wrap(Box::new(move |event: Event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_open(&event);
                }
            }) as Box<dyn FnMut(Event)>)
        };
        let message = {
            let weak = weak.clone();
            Closure::wrap(Box::new(move |event: MessageEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_message(&event);
                }
            }) as Box<dyn FnMut(MessageEvent)>)
        };
        let error = {
            let weak = weak.clone();
            Closure::wrap(Box::new(move |event: Event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_error(&event);
                }
            }) as Box<dyn FnMut(Event)>)
        };
        let close = {
            let weak = weak.clone();
            Closure::wrap(Box::new(move |event: CloseEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_close(&event);
                }
            }) as Box<dyn FnMut(CloseEvent)>)
        };

        Self {
            open,
            message,
            error,
            close,
            heartbeat: timer(weak, Inner::on_heartbeat),
            retry: timer(weak, Inner::on_retry),
            handshake_expired: timer(weak, Inner::on_handshake_expired),
        }
    }
}

fn timer(weak: &Weak<Inner>, tick: fn(&Inner)) -> Closure<dyn FnMut()> {
    let weak = weak.clone();
    Closure::wrap(Box::new(move || {
        if let Some(inner) = weak.upgrade() {
            tick(&inner);
        }
    }) as Box<dyn FnMut()>)
}

impl Inner {
    fn new(config: ClientConfig, debug: bool) -> Rc<Self> {
        Rc::new_cyclic(|weak| Inner {
            config,
            debug,
            state: StateMachine::new(),
            dispatcher: Dispatcher::new(),
            on_state: RefCell::new(None),
            on_error: RefCell::new(None),
            on_close: RefCell::new(None),
            socket: RefCell::new(None),
            target: RefCell::new(None),
            policy: RefCell::new(None),
            heartbeat_timer: Cell::new(None),
            retry_timer: Cell::new(None),
            handshake_timer: Cell::new(None),
            last_error: RefCell::new(None),
            callbacks: Callbacks::new(weak),
        })
    }

    fn connect(&self, url: &str, token: &str, device_type: &str) -> bool {
        let target = match Target::parse(url, Credentials::new(token, device_type)) {
            Ok(target) => target,
            Err(e) => return self.fail(e.to_string()),
        };
        if let Err(state) = self
            .state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            return self.fail(Error::InvalidState { state }.to_string());
        }
        *self.target.borrow_mut() = Some(target);
        *self.policy.borrow_mut() = None;

        match self.open() {
            Ok(()) => {
                self.notify(ConnectionState::Connecting);
                true
            }
            Err(reason) => {
                self.state.reset();
                self.fail(reason)
            }
        }
    }

    fn send(&self, message: &str) -> bool {
        if self.state.current() != ConnectionState::Connected {
            return self.fail(Error::NotConnected.to_string());
        }
        let socket = self.socket.borrow().clone();
        let Some(socket) = socket else {
            return self.fail(Error::NotConnected.to_string());
        };
        match socket.send_with_str(message) {
            Ok(()) => true,
            Err(e) => self.fail(Error::WriteFailed(describe(&e)).to_string()),
        }
    }

    fn close(&self) -> bool {
        let had_socket = self.socket.borrow().is_some();
        self.shutdown();
        let previous = self.state.reset();
        if previous != ConnectionState::Disconnected {
            self.notify(ConnectionState::Disconnected);
        }
        if had_socket || previous != ConnectionState::Disconnected {
            self.trace("closed");
        } else {
            self.trace("already closed");
        }
        true
    }

    /// Cancel every timer and drop the socket without notifying anyone
    fn shutdown(&self) {
        clear_timeout(&self.retry_timer);
        *self.policy.borrow_mut() = None;
        self.release();
    }

    /// Detach and close the current socket and stop its timers
    fn release(&self) {
        clear_interval(&self.heartbeat_timer);
        clear_timeout(&self.handshake_timer);
        let socket = self.socket.borrow_mut().take();
        if let Some(socket) = socket {
            socket.set_onopen(None);
            socket.set_onmessage(None);
            socket.set_onerror(None);
            socket.set_onclose(None);
            if let Err(e) = socket.close() {
                log_debug!("closing socket: {}", describe(&e));
            }
        }
    }

    fn open(&self) -> Result<(), String> {
        let url = self
            .target
            .borrow()
            .as_ref()
            .map(Target::query_url)
            .ok_or_else(|| "no connection target".to_string())?;

        let socket = WebSocket::new(url.as_str())
            .map_err(|e| Error::ConnectFailed(describe(&e)).to_string())?;
        socket.set_binary_type(BinaryType::Arraybuffer);
        socket.set_onopen(Some(self.callbacks.open.as_ref().unchecked_ref()));
        socket.set_onmessage(Some(self.callbacks.message.as_ref().unchecked_ref()));
        socket.set_onerror(Some(self.callbacks.error.as_ref().unchecked_ref()));
        socket.set_onclose(Some(self.callbacks.close.as_ref().unchecked_ref()));
        *self.socket.borrow_mut() = Some(socket);

        self.handshake_timer.set(set_timeout(
            &self.callbacks.handshake_expired,
            self.config.handshake_timeout,
        ));
        self.trace("socket created");
        Ok(())
    }

    fn is_current(&self, event: &Event) -> bool {
        let socket = self.socket.borrow();
        match (socket.as_ref(), event.target()) {
            (Some(socket), Some(target)) => {
                let socket: &JsValue = socket.as_ref();
                let target: &JsValue = target.as_ref();
                socket == target
            }
            _ => false,
        }
    }

    fn on_open(&self, event: &Event) {
        if !self.is_current(event) {
            return;
        }
        clear_timeout(&self.handshake_timer);
        if self
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
            .is_err()
        {
            return;
        }
        *self.policy.borrow_mut() = None;
        if self.config.heartbeat.enabled {
            self.heartbeat_timer.set(set_interval(
                &self.callbacks.heartbeat,
                self.config.heartbeat.interval,
            ));
        }
        self.trace("connected");
        self.notify(ConnectionState::Connected);
    }

    fn on_message(&self, event: &MessageEvent) {
        if !self.is_current(event) {
            return;
        }
        let data = event.data();
        let payload = if let Some(text) = data.as_string() {
            text
        } else if let Some(buffer) = data.dyn_ref::<ArrayBuffer>() {
            String::from_utf8_lossy(&Uint8Array::new(buffer).to_vec()).into_owned()
        } else {
            log_debug!("ignoring inbound payload of unknown type");
            return;
        };
        self.dispatcher.dispatch(&payload);
    }

    fn on_error(&self, event: &Event) {
        if !self.is_current(event) {
            return;
        }
        *self.last_error.borrow_mut() = Some("socket error".to_string());
        let handler = self.on_error.borrow().clone();
        if let Some(handler) = handler {
            if let Err(e) = handler.call1(&JsValue::NULL, event) {
                log_error!("error handler threw: {}", describe(&e));
            }
        }
    }

    fn on_close(&self, event: &CloseEvent) {
        if !self.is_current(event) {
            return;
        }
        let code = event.code();
        let reason = event.reason();
        let was = self.state.current();
        self.release();
        self.trace(&format!("socket closed ({code})"));
        if was == ConnectionState::Connected {
            *self.last_error.borrow_mut() = Some(
                Error::ReadFailed(format!("closed by peer ({code})")).to_string(),
            );
        }

        self.after_loss(was);

        let handler = self.on_close.borrow().clone();
        if let Some(handler) = handler {
            if let Err(e) =
                handler.call2(&JsValue::NULL, &JsValue::from(code), &JsValue::from_str(&reason))
            {
                log_error!("close handler threw: {}", describe(&e));
            }
        }
    }

    fn on_heartbeat(&self) {
        if self.state.current() != ConnectionState::Connected {
            return;
        }
        let socket = self.socket.borrow().clone();
        if let Some(socket) = socket {
            if let Err(e) = socket.send_with_str(&self.config.heartbeat.payload) {
                log_warn!("keepalive send failed: {}", describe(&e));
            }
        }
    }

    fn on_retry(&self) {
        self.retry_timer.set(None);
        if self
            .state
            .transition(ConnectionState::Reconnecting, ConnectionState::Connecting)
            .is_err()
        {
            return;
        }
        self.trace("reconnecting");
        match self.open() {
            Ok(()) => self.notify(ConnectionState::Connecting),
            Err(reason) => {
                log_warn!("reconnect failed: {}", reason);
                *self.last_error.borrow_mut() = Some(reason);
                self.after_loss(ConnectionState::Connecting);
            }
        }
    }

    fn on_handshake_expired(&self) {
        self.handshake_timer.set(None);
        if self.state.current() != ConnectionState::Connecting {
            return;
        }
        *self.last_error.borrow_mut() = Some(
            Error::ConnectTimeout {
                timeout: self.config.handshake_timeout,
            }
            .to_string(),
        );
        self.release();
        self.after_loss(ConnectionState::Connecting);
    }

    /// Schedule a retry when the policy allows it, otherwise settle in `Disconnected`
    fn after_loss(&self, was: ConnectionState) {
        let delay = {
            let mut policy = self.policy.borrow_mut();
            if was == ConnectionState::Connected || policy.is_none() {
                *policy = ReconnectPolicy::from_config(&self.config.reconnect);
            }
            policy.as_mut().and_then(ReconnectPolicy::next_delay)
        };

        let retrying = match delay {
            Some(delay)
                if matches!(
                    was,
                    ConnectionState::Connecting | ConnectionState::Connected
                ) && self
                    .state
                    .transition(was, ConnectionState::Reconnecting)
                    .is_ok() =>
            {
                self.retry_timer
                    .set(set_timeout(&self.callbacks.retry, delay));
                true
            }
            _ => false,
        };

        if retrying {
            self.notify(ConnectionState::Reconnecting);
        } else {
            *self.policy.borrow_mut() = None;
            if self.state.reset() != ConnectionState::Disconnected {
                self.notify(ConnectionState::Disconnected);
            }
        }
    }

    fn notify(&self, state: ConnectionState) {
        let handler = self.on_state.borrow().clone();
        if let Some(handler) = handler {
            if let Err(e) = handler.call1(&JsValue::NULL, &JsValue::from(state.as_u8())) {
                log_error!("state handler threw: {}", describe(&e));
            }
        }
    }

    fn fail(&self, reason: String) -> bool {
        self.trace(&reason);
        *self.last_error.borrow_mut() = Some(reason);
        false
    }

    fn trace(&self, message: &str) {
        log_debug!("{}", message);
        if self.debug {
            web_sys::console::log_1(&JsValue::from_str(&format!("[BrowserClient] {message}")));
        }
    }
}

fn describe(value: &JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}

fn millis(duration: Duration) -> i32 {
    i32::try_from(duration.as_millis()).unwrap_or(i32::MAX)
}

fn set_timeout(callback: &Closure<dyn FnMut()>, delay: Duration) -> Option<i32> {
    web_sys::window()?
        .set_timeout_with_callback_and_timeout_and_arguments_0(
            callback.as_ref().unchecked_ref(),
            millis(delay),
        )
        .ok()
}

fn set_interval(callback: &Closure<dyn FnMut()>, period: Duration) -> Option<i32> {
    web_sys::window()?
        .set_interval_with_callback_and_timeout_and_arguments_0(
            callback.as_ref().unchecked_ref(),
            millis(period),
        )
        .ok()
}

fn clear_timeout(handle: &Cell<Option<i32>>) {
    if let (Some(id), Some(window)) = (handle.take(), web_sys::window()) {
        window.clear_timeout_with_handle(id);
    }
}

fn clear_interval(handle: &Cell<Option<i32>>) {
    if let (Some(id), Some(window)) = (handle.take(), web_sys::window()) {
        window.clear_interval_with_handle(id);
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn test_send_before_connect_fails() {
        let client = BrowserClient::new(None).unwrap();
        assert!(!client.send("hello"));
        assert!(client.last_error().unwrap().contains("Not connected"));
        assert_eq!(client.state(), 0);
    }

    #[wasm_bindgen_test]
    fn test_invalid_url_rejected() {
        let client = BrowserClient::new(None).unwrap();
        assert!(!client.connect("http://example.com", "tok", None));
        assert_eq!(client.state(), 0);
        assert!(client.last_error().is_some());
    }

    #[wasm_bindgen_test]
    fn test_connect_then_close() {
        let client = BrowserClient::new(None).unwrap();
        assert!(client.connect("ws://127.0.0.1:9/ws", "tok", None));
        assert_eq!(client.state(), 1);
        assert!(!client.connect("ws://127.0.0.1:9/ws", "tok", None));

        assert!(client.close());
        assert_eq!(client.state(), 0);
        assert!(client.close());
        assert_eq!(client.state(), 0);
    }
}
