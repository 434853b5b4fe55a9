//! Inbound dispatcher
//!
//! Holds the single registered message handler and invokes it for each
//! payload. Registration replaces the previous handler; the handler is called
//! outside the slot lock so it may re-register (or clear) itself.

use crate::{log_error, log_trace};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Receiver of inbound payloads
pub trait MessageHandler {
    /// Handle one payload
    fn on_message(&self, payload: &str);
}

impl<F> MessageHandler for F
where
    F: Fn(&str) + ?Sized,
{
    fn on_message(&self, payload: &str) {
        self(payload)
    }
}

/// What happened to a dispatched payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The handler ran to completion
    Delivered,
    /// No handler was registered; the payload was dropped
    NoHandler,
    /// The handler panicked; the panic was contained
    Panicked,
}

/// Single-slot message dispatcher
pub struct Dispatcher<H: ?Sized> {
    handler: Mutex<Option<Arc<H>>>,
    delivered: AtomicU64,
    panicked: AtomicU64,
}

impl<H: ?Sized + MessageHandler> Dispatcher<H> {
    /// Create a dispatcher with no handler
    pub fn new() -> Self {
        Self {
            handler: Mutex::new(None),
            delivered: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
        }
    }

    /// Register a handler, returning the one it replaces
    pub fn set_handler(&self, handler: Arc<H>) -> Option<Arc<H>> {
        self.slot().replace(handler)
    }

    /// Remove the handler
    pub fn clear_handler(&self) -> Option<Arc<H>> {
        self.slot().take()
    }

    /// Whether a handler is registered
    pub fn has_handler(&self) -> bool {
        self.slot().is_some()
    }

    /// Invoke the current handler with `payload`
    pub fn dispatch(&self, payload: &str) -> Dispatch {
        let handler = self.slot().clone();
        let Some(handler) = handler else {
            log_trace!("dropping inbound message, no handler registered");
            return Dispatch::NoHandler;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler.on_message(payload))) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                Dispatch::Delivered
            }
            Err(cause) => {
                self.panicked.fetch_add(1, Ordering::Relaxed);
                log_error!("message handler panicked: {}", panic_message(&*cause));
                Dispatch::Panicked
            }
        }
    }

    /// Payloads delivered successfully
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Handler invocations that panicked
    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<H>>> {
        // the handler never runs under this lock, so poisoning carries no torn state
        self.handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<H: ?Sized + MessageHandler> Default for Dispatcher<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ?Sized> fmt::Debug for Dispatcher<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("delivered", &self.delivered.load(Ordering::Relaxed))
            .field("panicked", &self.panicked.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = cause.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
