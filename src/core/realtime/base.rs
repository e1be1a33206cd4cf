//! Base traits and types for the upstream realtime AI session.
//!
//! A call opens exactly one upstream session. The session accepts commands
//! from the call bridge (append audio, request a response, commit the input
//! buffer) and reports back through a channel of [`UpstreamEvent`]s. The
//! channel closing is the signal that the remote connection is gone.
//!
//! # Audio Format
//!
//! Both directions use G.711 μ-law at 8 kHz so telephony audio can be relayed
//! without a second codec hop.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// The session was already closed and cannot be reopened
    #[error("Session already closed")]
    SessionClosed,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Per-call configuration for an upstream session.
///
/// Connection-level settings (`api_key`, `url`, `model`) are normally filled
/// in by the [`RealtimeConnector`]; the call bridge only supplies the session
/// parameters derived from the agent profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// API key for authentication
    #[serde(default, skip_serializing)]
    pub api_key: String,

    /// WebSocket endpoint of the realtime API
    #[serde(default)]
    pub url: String,

    /// Model to use (e.g., "gpt-4o-realtime-preview")
    #[serde(default)]
    pub model: String,

    /// Voice ID for synthesized output
    #[serde(default)]
    pub voice: Option<String>,

    /// System instructions for the assistant
    #[serde(default)]
    pub instructions: Option<String>,

    /// Temperature for response generation
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Turn detection configuration
    #[serde(default)]
    pub turn_detection: TurnDetectionConfig,
}

/// Server-side voice activity detection thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TurnDetectionConfig {
    /// Activation threshold (0.0 to 1.0)
    pub threshold: f32,
    /// Audio kept before detected speech (ms)
    pub prefix_padding_ms: u32,
    /// Trailing silence before speech is marked stopped (ms)
    pub silence_duration_ms: u32,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of one upstream session: `Connecting → Open → Closed`.
///
/// `Connecting → Closed` happens when the handshake fails. There is no
/// transition out of `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Handshake not yet completed
    #[default]
    Connecting,
    /// Handshake done, session configured
    Open,
    /// Terminal
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Notifications delivered from the upstream session to the call bridge.
///
/// Any other protocol event is consumed inside the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// The caller finished an utterance
    SpeechStopped,
    /// One chunk of synthesized audio (μ-law bytes)
    AudioDelta(Bytes),
    /// The in-flight response generation finished
    ResponseCompleted,
    /// The remote reported an error
    RemoteError {
        /// Machine-readable code (falls back to the error type)
        code: String,
        /// Human-readable description
        message: String,
    },
}

// =============================================================================
// Session Traits
// =============================================================================

/// One open upstream session, exclusively owned by a call bridge.
#[async_trait]
pub trait UpstreamSession: Send + Sync {
    /// Current lifecycle state.
    fn connection_state(&self) -> ConnectionState;

    /// Append one chunk to the remote input buffer.
    ///
    /// Fire-and-forget: when the session is not open or the outbound queue is
    /// full the chunk is dropped and counted, never reported as an error.
    fn send_audio(&mut self, audio: Bytes);

    /// Commit the input audio buffer.
    async fn commit_audio(&mut self) -> RealtimeResult<()>;

    /// Ask the remote to start generating a response.
    async fn request_response(&mut self, instructions: Option<String>) -> RealtimeResult<()>;

    /// Close the connection. Idempotent and infallible.
    async fn close(&mut self);

    /// Number of audio chunks dropped by [`send_audio`](Self::send_audio).
    fn dropped_audio_chunks(&self) -> u64;
}

/// Boxed upstream session.
pub type BoxedUpstream = Box<dyn UpstreamSession>;

/// Opens upstream sessions for calls.
///
/// On success the returned session has completed the handshake and already
/// sent its session configuration. Notifications flow into `events`; the
/// sender is dropped when the remote connection ends.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(
        &self,
        config: RealtimeConfig,
        events: mpsc::Sender<UpstreamEvent>,
    ) -> RealtimeResult<BoxedUpstream>;
}
