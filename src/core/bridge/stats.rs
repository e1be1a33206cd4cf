//! Per-call counters and the summary logged when a call closes.

use std::time::Duration;

use crate::core::agent_config::ConfigSource;

use super::state::CallState;

/// Counters updated by the bridge as events flow.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallStats {
    /// Caller audio frames received
    pub frames_in: u64,
    /// Caller frames discarded because the upstream was not open yet
    pub frames_discarded: u64,
    /// Assistant audio chunks queued to the caller
    pub frames_out: u64,
    /// Inbound frames discarded because they could not be parsed
    pub malformed_frames: u64,
    /// `response.create` requests issued, including the greeting
    pub responses_requested: u64,
    /// Speech stops ignored because a response was already in flight
    pub speech_stops_suppressed: u64,
    /// Error events reported by the remote
    pub remote_errors: u64,
}

/// Final report of one call.
#[derive(Debug, Clone)]
pub struct CallSummary {
    pub call_id: Option<String>,
    pub stream_id: Option<String>,
    pub duration: Duration,
    pub final_state: CallState,
    pub upstream_opened: bool,
    pub config_source: Option<ConfigSource>,
    pub stats: CallStats,
    /// Caller frames the upstream adapter could not send
    pub upstream_dropped: u64,
    /// Assistant chunks the downstream adapter could not send
    pub downstream_dropped: u64,
}

impl CallSummary {
    /// All frames lost on either leg, including those received too early.
    pub fn total_dropped(&self) -> u64 {
        self.stats.frames_discarded + self.upstream_dropped + self.downstream_dropped
    }

    pub fn log(&self) {
        tracing::info!(
            call_id = self.call_id.as_deref().unwrap_or("-"),
            stream_id = self.stream_id.as_deref().unwrap_or("-"),
            duration_ms = self.duration.as_millis() as u64,
            state = %self.final_state,
            upstream_opened = self.upstream_opened,
            config_source = ?self.config_source,
            frames_in = self.stats.frames_in,
            frames_out = self.stats.frames_out,
            responses_requested = self.stats.responses_requested,
            speech_stops_suppressed = self.stats.speech_stops_suppressed,
            remote_errors = self.stats.remote_errors,
            frames_discarded = self.stats.frames_discarded,
            upstream_dropped = self.upstream_dropped,
            downstream_dropped = self.downstream_dropped,
            total_dropped = self.total_dropped(),
            malformed_frames = self.stats.malformed_frames,
            "Call closed"
        );
    }
}
