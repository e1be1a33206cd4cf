//! Per-call bridge between the telephony media stream and the realtime AI
//! session.

#[allow(clippy::module_inception)]
mod bridge;
mod error;
mod state;
mod stats;

pub use bridge::{
    ACTIVE_RESPONSE_ERROR_CODE, BridgeContext, BridgeSettings, CallBridge,
    UPSTREAM_EVENT_CAPACITY,
};
pub use error::{BridgeError, Leg};
pub use state::{CallState, ResponseGate};
pub use stats::{CallStats, CallSummary};
