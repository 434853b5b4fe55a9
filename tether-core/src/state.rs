//! Connection state machine
//!
//! The state lives in a single atomic cell so that observers can read it
//! without taking any lock. Writers move it with compare-and-swap: a transition
//! names the state it expects to leave, and if another context got there first
//! the transition is rejected instead of racing.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Connection state
///
/// The discriminants are the values pushed across the foreign and browser
/// boundaries, so they must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ConnectionState {
    /// No binding and no pending attempt
    Disconnected = 0,
    /// A handshake is in flight
    Connecting = 1,
    /// The binding is live
    Connected = 2,
    /// The binding was lost and a retry is scheduled
    Reconnecting = 3,
}

impl ConnectionState {
    /// Decode a state from its boundary value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ConnectionState::Disconnected),
            1 => Some(ConnectionState::Connecting),
            2 => Some(ConnectionState::Connected),
            3 => Some(ConnectionState::Reconnecting),
            _ => None,
        }
    }

    /// Boundary value of this state
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Boundary value as a C `int`
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Whether the machine may move from `self` to `next`
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Reconnecting)
                | (Connected, Disconnected)
                | (Connected, Reconnecting)
                | (Reconnecting, Connecting)
                | (Reconnecting, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Result of a successful `close`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// A live connection (or a pending attempt) was torn down
    Closed,
    /// Nothing was open; closing again is not an error
    AlreadyClosed,
}

/// Atomic connection state cell
#[derive(Debug)]
pub struct StateMachine {
    state: AtomicU8,
}

impl StateMachine {
    /// Create a state machine in `Disconnected`
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
        }
    }

    /// Current state; never blocks
    pub fn current(&self) -> ConnectionState {
        Self::decode(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`.
    ///
    /// Returns the state actually found when the cell no longer holds `from`
    /// or when the pair is not a legal edge.
    pub fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ConnectionState> {
        if !from.can_transition_to(to) {
            debug_assert!(false, "illegal transition {from} -> {to}");
            return Err(self.current());
        }
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(Self::decode)
    }

    /// Force `Disconnected` from any state and return the previous one
    pub fn reset(&self) -> ConnectionState {
        Self::decode(
            self.state
                .swap(ConnectionState::Disconnected.as_u8(), Ordering::AcqRel),
        )
    }

    fn decode(raw: u8) -> ConnectionState {
        // only this module writes the cell
        ConnectionState::from_u8(raw).unwrap_or(ConnectionState::Disconnected)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
