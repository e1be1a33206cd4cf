//! OpenAI Realtime API module.
//!
//! Audio-to-audio sessions over OpenAI's Realtime WebSocket API, configured
//! for telephony: G.711 μ-law in both directions and server-side VAD that
//! only reports speech boundaries. Response generation is always requested
//! explicitly by the caller of [`OpenAIRealtime`].
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse

mod client;
mod config;
mod messages;

pub use client::{OpenAIRealtime, OpenAIRealtimeConnector};
pub use config::{
    G711_ULAW_FORMAT, OPENAI_BETA_HEADER, OPENAI_REALTIME_URL, OpenAIRealtimeModel,
    OpenAIRealtimeVoice, build_ws_url,
};
pub use messages::{
    ApiError, ClientEvent, ResponseConfig, ServerEvent, SessionConfig, TurnDetection,
};
