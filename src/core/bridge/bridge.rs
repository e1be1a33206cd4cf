//! The per-call bridge actor.
//!
//! One [`CallBridge`] runs as one task and is the only code that touches its
//! call's state, so nothing here is locked. All inputs are multiplexed in a
//! single `select!`: the shutdown token, downstream frames, upstream
//! notifications and the pending setup future (config lookup followed by the
//! upstream handshake). Dropping the setup future abandons it, which is how a
//! `stop` that arrives mid-setup wins the race.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{BridgeError, Leg};
use super::state::{CallState, ResponseGate};
use super::stats::{CallStats, CallSummary};
use crate::core::agent_config::{AgentConfig, AgentConfigResolver, AgentDefaults};
use crate::core::realtime::{
    BoxedUpstream, RealtimeConnector, RealtimeError, UpstreamEvent, UpstreamSession,
};
use crate::core::registry::{CallRegistry, RegistryError};
use crate::core::telephony::{CloseStatus, DownstreamEvent, MediaSink, RoutingAttributes};

/// Error code the remote uses when a response is already being generated.
pub const ACTIVE_RESPONSE_ERROR_CODE: &str = "conversation_already_has_active_response";

/// Default capacity of the upstream notification channel.
pub const UPSTREAM_EVENT_CAPACITY: usize = 512;

/// Call-independent bridge settings.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub defaults: AgentDefaults,
    /// Send `input_audio_buffer.commit` before each utterance-triggered response
    pub commit_on_speech_stopped: bool,
    pub upstream_event_capacity: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            defaults: AgentDefaults::default(),
            commit_on_speech_stopped: false,
            upstream_event_capacity: UPSTREAM_EVENT_CAPACITY,
        }
    }
}

/// Shared collaborators handed to every bridge.
#[derive(Clone)]
pub struct BridgeContext {
    pub registry: CallRegistry,
    pub resolver: Arc<dyn AgentConfigResolver>,
    pub connector: Arc<dyn RealtimeConnector>,
    pub settings: Arc<BridgeSettings>,
    /// Process-wide shutdown; each bridge listens on a child token
    pub shutdown: CancellationToken,
}

struct SetupOutcome {
    config: AgentConfig,
    upstream: Result<(BoxedUpstream, mpsc::Receiver<UpstreamEvent>), RealtimeError>,
}

type SetupFuture = BoxFuture<'static, SetupOutcome>;

enum Step {
    Shutdown,
    Downstream(Option<DownstreamEvent>),
    Upstream(Option<UpstreamEvent>),
    SetupDone(SetupOutcome),
}

/// Owns one call from the first inbound frame until both legs are closed.
pub struct CallBridge {
    ctx: BridgeContext,
    state: CallState,
    gate: ResponseGate,
    call_id: Option<String>,
    stream_id: Option<String>,
    config: Option<AgentConfig>,
    downstream: Box<dyn MediaSink>,
    upstream: Option<BoxedUpstream>,
    upstream_events: Option<mpsc::Receiver<UpstreamEvent>>,
    setup: Option<SetupFuture>,
    registered: bool,
    upstream_opened: bool,
    close_status: Option<CloseStatus>,
    shutdown: CancellationToken,
    created_at: Instant,
    stats: CallStats,
}

impl CallBridge {
    pub fn new(ctx: BridgeContext, downstream: Box<dyn MediaSink>) -> Self {
        let shutdown = ctx.shutdown.child_token();
        Self {
            ctx,
            state: CallState::AwaitingStart,
            gate: ResponseGate::default(),
            call_id: None,
            stream_id: None,
            config: None,
            downstream,
            upstream: None,
            upstream_events: None,
            setup: None,
            registered: false,
            upstream_opened: false,
            close_status: None,
            shutdown,
            created_at: Instant::now(),
            stats: CallStats::default(),
        }
    }

    /// Drive the call to completion.
    pub async fn run(mut self, mut downstream_events: mpsc::Receiver<DownstreamEvent>) -> CallSummary {
        while !self.state.is_ending() {
            let step = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Step::Shutdown,
                event = downstream_events.recv() => Step::Downstream(event),
                event = next_upstream_event(&mut self.upstream_events) => Step::Upstream(event),
                outcome = poll_setup(&mut self.setup) => Step::SetupDone(outcome),
            };

            match step {
                Step::Shutdown => self.begin_termination("shutdown requested"),
                Step::Downstream(Some(event)) => self.on_downstream_event(event).await,
                Step::Downstream(None) => self.begin_termination("telephony connection closed"),
                Step::Upstream(Some(event)) => self.on_upstream_event(event).await,
                Step::Upstream(None) => {
                    self.upstream_events = None;
                    self.begin_termination("realtime connection closed");
                }
                Step::SetupDone(outcome) => {
                    self.setup = None;
                    self.on_setup_complete(outcome).await;
                }
            }
        }

        self.finish().await
    }

    // =========================================================================
    // Downstream
    // =========================================================================

    async fn on_downstream_event(&mut self, event: DownstreamEvent) {
        match event {
            DownstreamEvent::StreamConnected => debug!("Media stream handshake received"),
            DownstreamEvent::StreamStart {
                call_id,
                stream_id,
                routing,
            } => self.on_stream_start(call_id, stream_id, routing),
            DownstreamEvent::MediaFrame(audio) => self.on_media_frame(audio),
            DownstreamEvent::StreamStop => {
                info!(call_id = self.call_label(), "Media stream stopped");
                self.begin_termination("stream stopped");
            }
            DownstreamEvent::Malformed(e) => {
                self.stats.malformed_frames += 1;
                let err = BridgeError::from(e);
                warn!(
                    call_id = self.call_label(),
                    fatal = err.is_fatal(),
                    "{}; frame discarded",
                    err
                );
            }
        }
    }

    fn on_stream_start(&mut self, call_id: String, stream_id: String, routing: RoutingAttributes) {
        if self.state != CallState::AwaitingStart || self.call_id.is_some() {
            warn!(
                call_id = %call_id,
                current = self.call_label(),
                "Ignoring repeated start on the same connection"
            );
            return;
        }

        info!(
            call_id = %call_id,
            stream_id = %stream_id,
            to = ?routing.to,
            agent_id = ?routing.agent_id,
            "Media stream started"
        );
        self.call_id = Some(call_id.clone());
        self.stream_id = Some(stream_id.clone());

        if let Err(e) = self
            .ctx
            .registry
            .register(&call_id, &stream_id, self.shutdown.clone())
        {
            self.close_status = Some(match &e {
                RegistryError::Duplicate(_) => CloseStatus::policy("duplicate call"),
                RegistryError::AtCapacity(_) | RegistryError::ShuttingDown => {
                    CloseStatus::try_again_later("server busy")
                }
            });
            let err = BridgeError::from(e);
            warn!(call_id = %call_id, fatal = err.is_fatal(), "{}", err);
            self.begin_termination("call rejected");
            return;
        }
        self.registered = true;
        self.setup = Some(self.setup_future(routing));
    }

    fn setup_future(&self, routing: RoutingAttributes) -> SetupFuture {
        let resolver = self.ctx.resolver.clone();
        let connector = self.ctx.connector.clone();
        let settings = self.ctx.settings.clone();
        let call_id = self.call_label().to_string();

        async move {
            let profile = match resolver.resolve(&routing).await {
                Ok(profile) => profile,
                Err(e) => {
                    let err = BridgeError::from(e);
                    warn!(call_id = %call_id, "{}; using defaults", err);
                    None
                }
            };
            let config = AgentConfig::resolve(profile, &settings.defaults);
            debug!(call_id = %call_id, source = ?config.source, voice = %config.voice, "Agent config resolved");

            let (tx, rx) = mpsc::channel(settings.upstream_event_capacity);
            let upstream = connector
                .connect(config.realtime_config(), tx)
                .await
                .map(|session| (session, rx));
            SetupOutcome { config, upstream }
        }
        .boxed()
    }

    fn on_media_frame(&mut self, audio: Bytes) {
        self.stats.frames_in += 1;
        match self.upstream.as_mut() {
            Some(upstream) if self.state.is_streaming() => upstream.send_audio(audio),
            _ => self.stats.frames_discarded += 1,
        }
    }

    // =========================================================================
    // Setup
    // =========================================================================

    async fn on_setup_complete(&mut self, outcome: SetupOutcome) {
        let SetupOutcome { config, upstream } = outcome;
        match upstream {
            Ok((session, events)) => {
                info!(
                    call_id = self.call_label(),
                    source = ?config.source,
                    "Realtime session opened"
                );
                self.upstream = Some(session);
                self.upstream_events = Some(events);
                self.upstream_opened = true;
                self.state = CallState::Active;
                let instructions = config.welcome_instructions();
                self.config = Some(config);
                self.request_response(Some(instructions)).await;
            }
            Err(e) => {
                let err = BridgeError::UpstreamConnect(e);
                error!(call_id = self.call_label(), fatal = err.is_fatal(), "{}", err);
                self.config = Some(config);
                self.close_status = Some(CloseStatus::internal_error("realtime session unavailable"));
                self.begin_termination("upstream connect failed");
            }
        }
    }

    // =========================================================================
    // Upstream
    // =========================================================================

    async fn on_upstream_event(&mut self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::SpeechStopped => self.on_speech_stopped().await,
            UpstreamEvent::AudioDelta(audio) => self.on_audio_delta(audio),
            UpstreamEvent::ResponseCompleted => self.on_response_completed(),
            UpstreamEvent::RemoteError { code, message } => self.on_remote_error(code, message),
        }
    }

    async fn on_speech_stopped(&mut self) {
        if !self.state.is_streaming() {
            return;
        }
        if self.gate.is_set() {
            self.stats.speech_stops_suppressed += 1;
            debug!(call_id = self.call_label(), "Response in flight, ignoring speech stop");
            return;
        }

        if self.ctx.settings.commit_on_speech_stopped {
            if let Some(upstream) = self.upstream.as_mut() {
                if let Err(e) = upstream.commit_audio().await {
                    warn!(call_id = self.call_label(), "Failed to commit input audio: {}", e);
                }
            }
        }
        self.request_response(None).await;
    }

    /// Set the gate and ask the remote for a response.
    async fn request_response(&mut self, instructions: Option<String>) {
        if !self.gate.try_acquire() {
            return;
        }
        self.state = CallState::ResponsePending;

        let result = match self.upstream.as_mut() {
            Some(upstream) => upstream.request_response(instructions).await,
            None => Err(RealtimeError::NotConnected),
        };
        match result {
            Ok(()) => self.stats.responses_requested += 1,
            Err(e) => {
                let err = BridgeError::SendOnClosedConnection {
                    leg: Leg::Upstream,
                    reason: e.to_string(),
                };
                warn!(call_id = self.call_label(), "{}", err);
                self.gate.release();
                self.state = CallState::Active;
            }
        }
    }

    fn on_audio_delta(&mut self, audio: Bytes) {
        let Some(stream_id) = self.stream_id.as_deref() else {
            return;
        };
        if self.downstream.send_audio(stream_id, &audio) {
            self.stats.frames_out += 1;
            return;
        }
        let reason = if self.downstream.is_open() {
            "outbound queue full"
        } else {
            "connection closed"
        };
        let err = BridgeError::SendOnClosedConnection {
            leg: Leg::Downstream,
            reason: reason.to_string(),
        };
        debug!(
            call_id = self.call_label(),
            dropped = self.downstream.dropped_chunks(),
            "{}; audio chunk dropped",
            err
        );
    }

    fn on_response_completed(&mut self) {
        if self.gate.release() {
            self.state = CallState::Active;
        } else {
            debug!(call_id = self.call_label(), "Response completed with no request pending");
        }
    }

    fn on_remote_error(&mut self, code: String, message: String) {
        self.stats.remote_errors += 1;
        let keeps_gate = code == ACTIVE_RESPONSE_ERROR_CODE;
        let err = BridgeError::RemoteProtocol { code, message };
        warn!(call_id = self.call_label(), fatal = err.is_fatal(), "{}", err);

        if !keeps_gate && self.gate.release() {
            self.state = CallState::Active;
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Enter `Terminating`. Idempotent; abandons any pending setup.
    fn begin_termination(&mut self, reason: &str) {
        if self.state.is_ending() {
            return;
        }
        info!(call_id = self.call_label(), state = %self.state, reason, "Terminating call");
        self.state = CallState::Terminating;
        self.setup = None;
    }

    async fn finish(mut self) -> CallSummary {
        self.setup = None;
        self.upstream_events = None;

        let mut upstream_dropped = 0;
        if let Some(mut upstream) = self.upstream.take() {
            upstream.close().await;
            upstream_dropped = upstream.dropped_audio_chunks();
        }
        self.downstream.close(self.close_status.take()).await;
        self.state = CallState::Closed;

        if self.registered {
            if let Some(call_id) = self.call_id.as_deref() {
                self.ctx.registry.remove(call_id);
            }
            self.registered = false;
        }

        let summary = CallSummary {
            call_id: self.call_id.clone(),
            stream_id: self.stream_id.clone(),
            duration: self.created_at.elapsed(),
            final_state: self.state,
            upstream_opened: self.upstream_opened,
            config_source: self.config.as_ref().map(|c| c.source),
            stats: self.stats.clone(),
            upstream_dropped,
            downstream_dropped: self.downstream.dropped_chunks(),
        };
        summary.log();
        summary
    }

    fn call_label(&self) -> &str {
        self.call_id.as_deref().unwrap_or("-")
    }
}

async fn next_upstream_event(
    events: &mut Option<mpsc::Receiver<UpstreamEvent>>,
) -> Option<UpstreamEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn poll_setup(setup: &mut Option<SetupFuture>) -> SetupOutcome {
    match setup {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}
