//! Failure taxonomy of a call bridge.

use thiserror::Error;

use crate::core::agent_config::ResolveError;
use crate::core::realtime::RealtimeError;
use crate::core::registry::RegistryError;
use crate::core::telephony::TelephonyError;

/// Which side of the bridge a failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Upstream,
    Downstream,
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Leg::Upstream => write!(f, "upstream"),
            Leg::Downstream => write!(f, "downstream"),
        }
    }
}

/// Errors observed while bridging a call.
///
/// Only [`is_fatal`](Self::is_fatal) errors end the call; the rest are
/// logged and the call continues.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The realtime session could not be opened
    #[error("Upstream connect failed: {0}")]
    UpstreamConnect(#[source] RealtimeError),

    /// The remote reported an error event
    #[error("Remote protocol error {code}: {message}")]
    RemoteProtocol { code: String, message: String },

    /// An inbound media frame could not be parsed
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] TelephonyError),

    /// The agent profile lookup failed; defaults are used
    #[error("Config resolution failed: {0}")]
    ConfigResolution(#[from] ResolveError),

    /// A command was issued on a connection that is no longer open
    #[error("Send on closed {leg} connection: {reason}")]
    SendOnClosedConnection { leg: Leg, reason: String },

    /// The call could not be registered
    #[error("Call rejected: {0}")]
    Rejected(#[from] RegistryError),
}

impl BridgeError {
    /// Whether this error terminates the call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::UpstreamConnect(_) | BridgeError::Rejected(_)
        )
    }
}
