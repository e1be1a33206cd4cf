//! Call lifecycle states and the single-flight response gate.

use std::fmt;

/// Lifecycle of one call.
///
/// ```text
/// AwaitingStart ──start+setup──▶ Active ◀──▶ ResponsePending
///       │                          │               │
///       └──────────── stop / close / failure ──────┴──▶ Terminating ──▶ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    AwaitingStart,
    Active,
    ResponsePending,
    Terminating,
    Closed,
}

impl CallState {
    /// Upstream is open and audio is being relayed.
    pub fn is_streaming(self) -> bool {
        matches!(self, CallState::Active | CallState::ResponsePending)
    }

    /// Teardown has begun or finished.
    pub fn is_ending(self) -> bool {
        matches!(self, CallState::Terminating | CallState::Closed)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::AwaitingStart => "AWAITING_START",
            CallState::Active => "ACTIVE",
            CallState::ResponsePending => "RESPONSE_PENDING",
            CallState::Terminating => "TERMINATING",
            CallState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// At most one response generation in flight per call.
#[derive(Debug, Default, Clone)]
pub struct ResponseGate {
    in_flight: bool,
}

impl ResponseGate {
    /// Set the gate. Returns `false` if it was already set.
    pub fn try_acquire(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Clear the gate. Returns `false` if it was not set.
    pub fn release(&mut self) -> bool {
        std::mem::replace(&mut self.in_flight, false)
    }

    pub fn is_set(&self) -> bool {
        self.in_flight
    }
}
