//! Media stream frame types.
//!
//! The telephony provider sends JSON text frames tagged by `event`:
//!
//! ```json
//! {"event":"connected","protocol":"Call","version":"1.0.0"}
//! {"event":"start","start":{"callSid":"CA1","streamSid":"MZ1","customParameters":{"to":"+1555"}}}
//! {"event":"media","media":{"payload":"<base64 μ-law>"}}
//! {"event":"stop"}
//! ```
//!
//! Outbound audio is a `media` frame tagged with the stream id. Any other
//! inbound event (`mark`, `dtmf`, ...) is accepted and ignored.

use std::collections::HashMap;

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while handling media stream frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelephonyError {
    /// Frame was not valid JSON or did not match a known shape
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Media payload was not valid base64
    #[error("Invalid media payload: {0}")]
    InvalidPayload(String),

    /// Outbound frame could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

// =============================================================================
// Inbound frames
// =============================================================================

/// Raw inbound frame as sent by the telephony provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundFrame {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        start: StartPayload,
    },
    Media {
        media: MediaPayload,
    },
    Stop {
        #[serde(default)]
        stop: Option<serde_json::Value>,
    },
    #[serde(other)]
    Other,
}

/// Payload of the `start` frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub call_sid: String,
    pub stream_sid: String,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

/// Payload of an inbound `media` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded μ-law audio
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
}

/// Routing attributes attached to a call, used to pick an agent profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingAttributes {
    /// Dialed number
    pub to: Option<String>,
    /// Caller number
    pub from: Option<String>,
    /// Explicit agent selection
    pub agent_id: Option<String>,
    /// Remaining custom parameters
    pub extra: HashMap<String, String>,
}

impl RoutingAttributes {
    /// Split the well-known keys out of the stream's custom parameters.
    pub fn from_parameters(mut params: HashMap<String, String>) -> Self {
        let mut take = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| params.remove(*k))
                .filter(|v| !v.is_empty())
        };
        let to = take(&["to", "To"]);
        let from = take(&["from", "From"]);
        let agent_id = take(&["agentId", "agent_id", "AgentId"]);

        Self {
            to,
            from,
            agent_id,
            extra: params,
        }
    }

    /// True when nothing identifies an agent profile.
    pub fn is_empty(&self) -> bool {
        self.to.is_none() && self.agent_id.is_none()
    }
}

/// Event delivered from the media connection to the call bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum DownstreamEvent {
    StreamConnected,
    StreamStart {
        call_id: String,
        stream_id: String,
        routing: RoutingAttributes,
    },
    /// One chunk of caller audio (μ-law bytes)
    MediaFrame(Bytes),
    StreamStop,
    /// An inbound frame was discarded; the connection stays up
    Malformed(TelephonyError),
}

/// Parse one text frame.
///
/// `Ok(None)` means the frame was valid but carries nothing the bridge acts on.
pub fn parse_frame(text: &str) -> Result<Option<DownstreamEvent>, TelephonyError> {
    let frame: InboundFrame =
        serde_json::from_str(text).map_err(|e| TelephonyError::MalformedFrame(e.to_string()))?;

    let event = match frame {
        InboundFrame::Connected { protocol } => {
            tracing::debug!(?protocol, "Media stream connected");
            DownstreamEvent::StreamConnected
        }
        InboundFrame::Start { start } => DownstreamEvent::StreamStart {
            call_id: start.call_sid,
            stream_id: start.stream_sid,
            routing: RoutingAttributes::from_parameters(start.custom_parameters),
        },
        InboundFrame::Media { media } => {
            if media.track.as_deref().is_some_and(|t| t == "outbound") {
                return Ok(None);
            }
            let audio = BASE64_STANDARD
                .decode(media.payload.as_bytes())
                .map_err(|e| TelephonyError::InvalidPayload(e.to_string()))?;
            DownstreamEvent::MediaFrame(Bytes::from(audio))
        }
        InboundFrame::Stop { .. } => DownstreamEvent::StreamStop,
        InboundFrame::Other => return Ok(None),
    };

    Ok(Some(event))
}

// =============================================================================
// Outbound frames
// =============================================================================

/// Frame sent back to the telephony provider.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
}

/// Payload of an outbound `media` frame.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    /// Base64-encoded μ-law audio
    pub payload: String,
}

impl OutboundFrame {
    /// Build a media frame for one audio chunk.
    pub fn media(stream_id: &str, audio: &[u8]) -> Self {
        OutboundFrame::Media {
            stream_sid: stream_id.to_string(),
            media: OutboundMedia {
                payload: BASE64_STANDARD.encode(audio),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, TelephonyError> {
        serde_json::to_string(self).map_err(|e| TelephonyError::Serialization(e.to_string()))
    }
}
