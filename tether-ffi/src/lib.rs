//! C ABI for Tether
//!
//! A process-wide client behind plain C functions, for hosts that embed the
//! library as a shared or static object (C/C++, JNI shims, Swift).
//!
//! Host contract:
//! - Functions returning `c_int` return 1 on success and 0 on failure; the
//!   failure reason is available from [`tether_last_error`] on the same thread.
//! - String arguments are NUL-terminated UTF-8 and only borrowed for the call.
//! - Callbacks run on library threads. The message pointer is valid only for
//!   the duration of the callback. Callbacks may call back into this API.
//! - Callbacks and settings registered before `tether_connect` apply to every
//!   client created afterwards.
//!
//! The library owns a private multi-threaded tokio runtime; no host runtime is
//! required.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

use std::cell::RefCell;
use std::ffi::{c_char, c_int, CStr, CString};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tether_client::{Client, ClientConfig};
use tether_core::{log_debug, log_warn, CloseOutcome, ConnectionState, Credentials, Target};
use tokio::runtime::{Builder, Handle, Runtime};

/// Receives each inbound message as a NUL-terminated UTF-8 string
pub type TetherMessageCallback = extern "C" fn(message: *const c_char);

/// Receives each state change: 0 disconnected, 1 connecting, 2 connected,
/// 3 reconnecting
pub type TetherStateCallback = extern "C" fn(state: c_int);

const DEFAULT_HEARTBEAT_MS: u64 = 20_000;
const DEFAULT_RECONNECT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy)]
struct Settings {
    auto_reconnect: bool,
    reconnect_interval: Duration,
    // zero disables keepalives
    heartbeat_interval: Duration,
}

impl Settings {
    const fn new() -> Self {
        Self {
            auto_reconnect: false,
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
        }
    }

    fn to_config(self) -> ClientConfig {
        let mut config = ClientConfig::default();
        if !self.heartbeat_interval.is_zero() {
            config = config.heartbeat(self.heartbeat_interval);
        }
        if self.auto_reconnect {
            config = config.auto_reconnect(self.reconnect_interval);
        }
        config
    }
}

/// The process-wide client, tagged with the `tether_connect` call that made it
struct Installed {
    generation: u64,
    client: Client,
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();
static CLIENT: Mutex<Option<Installed>> = Mutex::new(None);
static GENERATION: AtomicU64 = AtomicU64::new(0);
static SETTINGS: Mutex<Settings> = Mutex::new(Settings::new());
static MESSAGE_CALLBACK: Mutex<Option<TetherMessageCallback>> = Mutex::new(None);
static STATE_CALLBACK: Mutex<Option<TetherStateCallback>> = Mutex::new(None);

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Connect to `url`, replacing (and closing) any previous client.
///
/// The new client is visible to the other functions while its handshake runs,
/// so `tether_close` from another thread aborts the attempt and this call
/// returns 0.
///
/// # Safety
///
/// Each argument must be null or point to a NUL-terminated string that stays
/// valid for the duration of the call. `device_type` may be null or empty to
/// use the default device type.
#[no_mangle]
pub unsafe extern "C" fn tether_connect(
    url: *const c_char,
    token: *const c_char,
    device_type: *const c_char,
) -> c_int {
    call(|| {
        let url = borrow_str(url, "url")?;
        let token = borrow_str(token, "token")?;
        let device_type = if device_type.is_null() {
            ""
        } else {
            borrow_str(device_type, "device_type")?
        };

        // a bad address must not tear down the current client
        Target::parse(url, Credentials::new(token, device_type)).map_err(|e| e.to_string())?;

        let settings = *lock(&SETTINGS);
        let client = Client::new(settings.to_config()).map_err(|e| e.to_string())?;
        install_callbacks(&client);

        let generation = GENERATION.fetch_add(1, Ordering::Relaxed);
        let previous = lock(&CLIENT).replace(Installed {
            generation,
            client: client.clone(),
        });
        if let Some(previous) = previous {
            log_debug!("replacing previous client");
            if let Err(e) = block_on(previous.client.close())? {
                log_warn!("closing previous client: {}", e);
            }
        }

        let connected = block_on(client.connect(url, token, device_type))?;
        if let Err(e) = connected {
            let mut slot = lock(&CLIENT);
            let stale = slot
                .as_ref()
                .is_some_and(|installed| installed.generation == generation);
            let failed = if stale { slot.take() } else { None };
            drop(slot);
            drop(failed);
            return Err(e.to_string());
        }

        // closed or replaced before the handshake started
        let installed = lock(&CLIENT)
            .as_ref()
            .is_some_and(|installed| installed.generation == generation);
        if !installed {
            let _ = block_on(client.close())?;
            return Err(tether_core::Error::Aborted.to_string());
        }
        Ok(())
    })
}

/// Send a text message on the current connection.
///
/// # Safety
///
/// `message` must be null or point to a NUL-terminated string that stays
/// valid for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn tether_send(message: *const c_char) -> c_int {
    call(|| {
        let message = borrow_str(message, "message")?;
        let client = current_client().ok_or_else(|| tether_core::Error::NotConnected.to_string())?;
        block_on(client.send(message))?.map_err(|e| e.to_string())
    })
}

/// Close the current connection. Succeeds when there is nothing to close.
#[no_mangle]
pub extern "C" fn tether_close() -> c_int {
    call(|| {
        let installed = lock(&CLIENT).take();
        let Some(Installed { client, .. }) = installed else {
            return Ok(());
        };
        match block_on(client.close())? {
            Ok(CloseOutcome::Closed | CloseOutcome::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    })
}

/// Current connection state, 0 when there is no client
#[no_mangle]
pub extern "C" fn tether_get_state() -> c_int {
    current_client()
        .map(|client| client.state())
        .unwrap_or(ConnectionState::Disconnected)
        .as_i32()
}

/// Register (or clear, with null) the message callback
///
/// Applies to the current client and to every later one.
#[no_mangle]
pub extern "C" fn tether_set_message_callback(callback: Option<TetherMessageCallback>) {
    *lock(&MESSAGE_CALLBACK) = callback;
    if let Some(client) = current_client() {
        match callback {
            Some(_) => install_message_callback(&client),
            None => client.clear_message_callback(),
        }
    }
}

/// Register (or clear, with null) the state callback
#[no_mangle]
pub extern "C" fn tether_set_state_callback(callback: Option<TetherStateCallback>) {
    *lock(&STATE_CALLBACK) = callback;
}

/// Configure clients created by later `tether_connect` calls.
///
/// `reconnect_interval_ms` must be positive when `auto_reconnect` is non-zero.
/// A `heartbeat_interval_ms` of 0 disables keepalives.
#[no_mangle]
pub extern "C" fn tether_configure(
    auto_reconnect: c_int,
    reconnect_interval_ms: c_int,
    heartbeat_interval_ms: c_int,
) -> c_int {
    call(|| {
        let reconnect = u64::try_from(reconnect_interval_ms)
            .map_err(|_| format!("invalid reconnect interval: {reconnect_interval_ms}"))?;
        let heartbeat = u64::try_from(heartbeat_interval_ms)
            .map_err(|_| format!("invalid heartbeat interval: {heartbeat_interval_ms}"))?;

        let settings = Settings {
            auto_reconnect: auto_reconnect != 0,
            reconnect_interval: Duration::from_millis(reconnect),
            heartbeat_interval: Duration::from_millis(heartbeat),
        };
        settings.to_config().validate().map_err(|e| e.to_string())?;
        *lock(&SETTINGS) = settings;
        Ok(())
    })
}

/// Reason for the last failed call on this thread, or null.
///
/// The pointer stays valid until the next call into this library on the same
/// thread.
#[no_mangle]
pub extern "C" fn tether_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |message| message.as_ptr())
    })
}

/// Run one API call: clear the error slot, contain panics, map to 1/0
fn call(f: impl FnOnce() -> Result<(), String>) -> c_int {
    set_last_error(None);
    let outcome = panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|_| Err("internal panic".to_string()));
    match outcome {
        Ok(()) => 1,
        Err(reason) => {
            log_debug!("call failed: {}", reason);
            set_last_error(Some(reason));
            0
        }
    }
}

fn set_last_error(reason: Option<String>) {
    let message = reason.map(|reason| {
        CString::new(reason.replace('\0', " ")).unwrap_or_default()
    });
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
}

/// # Safety
///
/// `ptr` must be null or a valid NUL-terminated string for `'a`.
unsafe fn borrow_str<'a>(ptr: *const c_char, name: &str) -> Result<&'a str, String> {
    if ptr.is_null() {
        return Err(format!("{name} must not be null"));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|e| format!("{name} is not valid UTF-8: {e}"))
}

fn current_client() -> Option<Client> {
    lock(&CLIENT)
        .as_ref()
        .map(|installed| installed.client.clone())
}

fn install_callbacks(client: &Client) {
    if lock(&MESSAGE_CALLBACK).is_some() {
        install_message_callback(client);
    }
    client.set_state_listener(|state| {
        let callback = *lock(&STATE_CALLBACK);
        if let Some(callback) = callback {
            callback(state.as_i32());
        }
    });
}

fn install_message_callback(client: &Client) {
    client.set_message_callback(|message| {
        let callback = *lock(&MESSAGE_CALLBACK);
        let Some(callback) = callback else {
            return;
        };
        match CString::new(message) {
            Ok(message) => callback(message.as_ptr()),
            Err(_) => {
                log_warn!("dropping inbound message containing NUL");
            }
        }
    });
}

fn runtime() -> Result<&'static Runtime, String> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }
    let runtime = Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("tether-ffi")
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start runtime: {e}"))?;
    Ok(RUNTIME.get_or_init(|| runtime))
}

/// Drive `future` to completion from a host thread or from inside a callback
fn block_on<F: Future>(future: F) -> Result<F::Output, String> {
    match Handle::try_current() {
        Ok(handle) => Ok(tokio::task::block_in_place(|| handle.block_on(future))),
        Err(_) => Ok(runtime()?.block_on(future)),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // no lock here is held across host callbacks
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
