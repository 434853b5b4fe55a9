//! Inbound events
//!
//! Both transport variants translate whatever their socket produces into this
//! one ordered stream, so the read loop never needs to know which kind of
//! transport it is draining.

/// Something the transport observed on the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// The host finished the handshake
    Opened,
    /// A text payload, or a binary payload decoded as lossy UTF-8
    Message(String),
    /// The transport reported a failure
    Error(String),
    /// The connection closed
    Closed {
        /// Close code, when the peer sent one
        code: Option<u16>,
        /// Close reason, possibly empty
        reason: String,
    },
}

impl InboundEvent {
    /// Build a message event from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        InboundEvent::Message(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Whether the binding is finished after this event
    pub fn is_terminal(&self) -> bool {
        matches!(self, InboundEvent::Error(_) | InboundEvent::Closed { .. })
    }

    /// Describe a terminal event for logs and read errors
    pub fn describe(&self) -> String {
        match self {
            InboundEvent::Opened => "opened".to_string(),
            InboundEvent::Message(_) => "message".to_string(),
            InboundEvent::Error(reason) => reason.clone(),
            InboundEvent::Closed { code: Some(code), reason } if !reason.is_empty() => {
                format!("closed by peer ({code}: {reason})")
            }
            InboundEvent::Closed { code: Some(code), .. } => format!("closed by peer ({code})"),
            InboundEvent::Closed { code: None, .. } => "closed by peer".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_payload_is_lossy_text() {
        assert_eq!(
            InboundEvent::from_bytes(b"hi\xff"),
            InboundEvent::Message("hi\u{fffd}".to_string())
        );
    }

    #[test]
    fn test_terminal_events() {
        assert!(!InboundEvent::Opened.is_terminal());
        assert!(!InboundEvent::Message("x".into()).is_terminal());
        assert!(InboundEvent::Error("reset".into()).is_terminal());
        let closed = InboundEvent::Closed {
            code: Some(1001),
            reason: "going away".into(),
        };
        assert!(closed.is_terminal());
        assert_eq!(closed.describe(), "closed by peer (1001: going away)");
    }
}
