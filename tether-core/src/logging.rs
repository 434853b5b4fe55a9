//! Logging macros shared by the Tether crates
//!
//! With the `logging` feature the macros forward to `tracing`. Without it,
//! errors and warnings go to stderr and the lower levels compile away. The
//! feature check happens in the calling crate, so every crate that uses these
//! macros declares its own `logging` feature forwarding to this one.

#[doc(hidden)]
pub mod __private {
    #[cfg(feature = "logging")]
    pub use tracing;
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        #[cfg(feature = "logging")]
        {
            $crate::logging::__private::tracing::error!($($arg)*);
        }
        #[cfg(not(feature = "logging"))]
        {
            eprintln!("[ERROR] {}", format!($($arg)*));
        }
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "logging")]
        {
            $crate::logging::__private::tracing::warn!($($arg)*);
        }
        #[cfg(not(feature = "logging"))]
        {
            eprintln!("[WARN] {}", format!($($arg)*));
        }
    };
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        #[cfg(feature = "logging")]
        {
            $crate::logging::__private::tracing::info!($($arg)*);
        }
        #[cfg(not(feature = "logging"))]
        {
            let _ = format_args!($($arg)*);
        }
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "logging")]
        {
            $crate::logging::__private::tracing::debug!($($arg)*);
        }
        #[cfg(not(feature = "logging"))]
        {
            let _ = format_args!($($arg)*);
        }
    };
}

/// Log a trace message
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "logging")]
        {
            $crate::logging::__private::tracing::trace!($($arg)*);
        }
        #[cfg(not(feature = "logging"))]
        {
            let _ = format_args!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    #[cfg(feature = "logging")]
    use tracing_test::traced_test;

    #[test]
    fn test_logging_macros() {
        log_info!("Test info message");
        log_warn!("Test warning message {}", 1);
        log_error!("Test error message");
        log_debug!("Test debug message");
        log_trace!("Test trace message");
    }

    #[cfg(feature = "logging")]
    #[traced_test]
    #[test]
    fn test_macros_reach_tracing() {
        log_warn!("heartbeat send failed: {}", "broken pipe");
        assert!(logs_contain("heartbeat send failed: broken pipe"));
    }
}
