//! Upstream realtime AI sessions.
//!
//! [`RealtimeConnector`] opens one [`UpstreamSession`] per call. The only
//! provider is OpenAI's Realtime API; tests substitute their own connector.

mod base;
pub mod openai;

pub use base::{
    BoxedUpstream, ConnectionState, RealtimeConfig, RealtimeConnector, RealtimeError,
    RealtimeResult, TurnDetectionConfig, UpstreamEvent, UpstreamSession,
};
pub use openai::{
    OPENAI_REALTIME_URL, OpenAIRealtime, OpenAIRealtimeConnector, OpenAIRealtimeModel,
    OpenAIRealtimeVoice,
};
