//! OpenAI Realtime API client implementation.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: G.711 μ-law, 8 kHz, mono, base64 encoded
//!
//! # Example
//!
//! ```rust,ignore
//! use callbridge::core::realtime::{OpenAIRealtimeConnector, RealtimeConfig, RealtimeConnector};
//!
//! let connector = OpenAIRealtimeConnector::new(api_key, url, model);
//! let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//! let mut session = connector.connect(RealtimeConfig::default(), tx).await?;
//! session.request_response(Some("Greet the caller".into())).await?;
//! while let Some(event) = rx.recv().await {
//!     // relay audio deltas
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message, client::IntoClientRequest};
use zeroize::Zeroize;

use super::config::{
    G711_ULAW_FORMAT, OPENAI_BETA_HEADER, OPENAI_REALTIME_URL, OpenAIRealtimeModel,
    OpenAIRealtimeVoice, build_ws_url,
};
use super::messages::{ClientEvent, ServerEvent, SessionConfig, TurnDetection};
use crate::core::realtime::base::{
    BoxedUpstream, ConnectionState, RealtimeConfig, RealtimeConnector, RealtimeError,
    RealtimeResult, UpstreamEvent, UpstreamSession,
};

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long `close()` waits for the connection task to flush a close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// OpenAI Realtime Client
// =============================================================================

/// One OpenAI Realtime session.
///
/// Outbound commands are queued on a bounded channel drained by a spawned
/// connection task, which also parses inbound events and forwards the ones
/// the bridge acts on. The task marks the session `Closed` when the socket
/// ends, and the event sender it owns is dropped at the same moment.
pub struct OpenAIRealtime {
    /// Configuration
    config: RealtimeConfig,
    /// Voice sent in `session.update`, passed through as configured
    voice: String,
    /// Connection state, shared with the connection task
    state: Arc<RwLock<ConnectionState>>,
    /// Session ID reported by `session.created`
    session_id: Arc<RwLock<Option<String>>>,
    /// WebSocket sender channel
    ws_sender: Option<mpsc::Sender<ClientEvent>>,
    /// Connection task handle
    connection_handle: Option<JoinHandle<()>>,
    /// Audio chunks dropped because the session was not writable
    dropped_audio: u64,
}

impl OpenAIRealtime {
    /// Create a client. Fails without an API key.
    pub fn new(mut config: RealtimeConfig) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        if config.url.is_empty() {
            config.url = OPENAI_REALTIME_URL.to_string();
        }
        if config.model.is_empty() {
            config.model = OpenAIRealtimeModel::default().as_str().to_string();
        }

        let voice = config
            .voice
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| OpenAIRealtimeVoice::default().as_str().to_string());
        if OpenAIRealtimeVoice::parse(&voice).is_none() {
            tracing::warn!(voice = %voice, "Voice is not a known OpenAI Realtime voice, sending it as given");
        }

        Ok(Self {
            config,
            voice,
            state: Arc::new(RwLock::new(ConnectionState::Connecting)),
            session_id: Arc::new(RwLock::new(None)),
            ws_sender: None,
            connection_handle: None,
            dropped_audio: 0,
        })
    }

    /// Get the configured voice.
    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Get the session ID once the server has announced it.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Build the initial session configuration.
    pub fn build_session_config(&self) -> SessionConfig {
        let td = self.config.turn_detection;
        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: self.config.instructions.clone(),
            voice: Some(self.voice.clone()),
            input_audio_format: Some(G711_ULAW_FORMAT.to_string()),
            output_audio_format: Some(G711_ULAW_FORMAT.to_string()),
            // Responses are requested by the bridge, never by the server.
            turn_detection: Some(TurnDetection::ServerVad {
                threshold: Some(td.threshold),
                prefix_padding_ms: Some(td.prefix_padding_ms),
                silence_duration_ms: Some(td.silence_duration_ms),
                create_response: Some(false),
            }),
            temperature: self.config.temperature,
        }
    }

    /// Perform the handshake, spawn the connection task and send
    /// `session.update`.
    pub async fn connect(&mut self, events: mpsc::Sender<UpstreamEvent>) -> RealtimeResult<()> {
        match *self.state.read() {
            ConnectionState::Open => return Ok(()),
            ConnectionState::Closed => return Err(RealtimeError::SessionClosed),
            ConnectionState::Connecting => {}
        }

        let url = build_ws_url(&self.config.url, &self.config.model);
        let request = match self.build_request(&url) {
            Ok(request) => request,
            Err(e) => {
                *self.state.write() = ConnectionState::Closed;
                return Err(e);
            }
        };

        let ws_stream = match tokio_tungstenite::connect_async(request).await {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                *self.state.write() = ConnectionState::Closed;
                return Err(map_handshake_error(e));
            }
        };

        tracing::info!(model = %self.config.model, "Connected to OpenAI Realtime API");

        let (ws_sink, ws_stream) = ws_stream.split();
        let (tx, rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);

        // Open before spawning so the task's own Closed transition always wins.
        *self.state.write() = ConnectionState::Open;

        let handle = tokio::spawn(run_connection(
            ws_sink,
            ws_stream,
            rx,
            events,
            self.state.clone(),
            self.session_id.clone(),
        ));
        self.connection_handle = Some(handle);
        self.ws_sender = Some(tx);

        let session = self.build_session_config();
        self.send_event(ClientEvent::SessionUpdate { session }).await
    }

    fn build_request(
        &self,
        url: &str,
    ) -> RealtimeResult<tungstenite::handshake::client::Request> {
        let mut request = url
            .into_client_request()
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;

        let auth = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(http::header::AUTHORIZATION, auth);
        headers.insert("OpenAI-Beta", HeaderValue::from_static(OPENAI_BETA_HEADER));

        Ok(request)
    }

    /// Send an event to the WebSocket.
    async fn send_event(&self, event: ClientEvent) -> RealtimeResult<()> {
        if *self.state.read() != ConnectionState::Open {
            return Err(RealtimeError::NotConnected);
        }
        let Some(sender) = self.ws_sender.as_ref() else {
            return Err(RealtimeError::NotConnected);
        };
        let kind = event.kind();
        sender
            .send(event)
            .await
            .map_err(|_| RealtimeError::NotConnected)?;
        tracing::debug!(event = kind, "Queued realtime event");
        Ok(())
    }
}

fn map_handshake_error(error: tungstenite::Error) -> RealtimeError {
    match error {
        tungstenite::Error::Http(response)
            if response.status() == http::StatusCode::UNAUTHORIZED
                || response.status() == http::StatusCode::FORBIDDEN =>
        {
            RealtimeError::AuthenticationFailed(format!(
                "handshake rejected with {}",
                response.status()
            ))
        }
        other => RealtimeError::ConnectionFailed(other.to_string()),
    }
}

/// Connection task: drains outbound events and translates inbound ones.
async fn run_connection<S, R>(
    mut ws_sink: S,
    mut ws_stream: R,
    mut rx: mpsc::Receiver<ClientEvent>,
    events: mpsc::Sender<UpstreamEvent>,
    state: Arc<RwLock<ConnectionState>>,
    session_id: Arc<RwLock<Option<String>>>,
) where
    S: futures_util::Sink<Message, Error = tungstenite::Error> + Unpin,
    R: futures_util::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(event) = outgoing else {
                    // Sender dropped: the owner closed the session.
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(&event) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }

            incoming = ws_stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                if let Some(notification) = translate_server_event(event, &session_id) {
                                    if events.send(notification).await.is_err() {
                                        tracing::debug!("Bridge stopped listening, ending connection task");
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!("Failed to parse server event: {} - {}", e, text);
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "WebSocket closed by server");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            tracing::error!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    *state.write() = ConnectionState::Closed;
}

/// Map a server event to the notification the bridge consumes, if any.
fn translate_server_event(
    event: ServerEvent,
    session_id: &RwLock<Option<String>>,
) -> Option<UpstreamEvent> {
    match event {
        ServerEvent::SessionCreated { session } => {
            tracing::info!(session_id = %session.id, model = %session.model, "OpenAI Realtime session created");
            *session_id.write() = Some(session.id);
            None
        }
        ServerEvent::SessionUpdated { session } => {
            tracing::debug!(voice = ?session.voice, "OpenAI Realtime session updated");
            None
        }
        ServerEvent::SpeechStarted { audio_start_ms } => {
            tracing::debug!("Speech started at {}ms", audio_start_ms);
            None
        }
        ServerEvent::SpeechStopped { audio_end_ms } => {
            tracing::debug!("Speech stopped at {}ms", audio_end_ms);
            Some(UpstreamEvent::SpeechStopped)
        }
        ServerEvent::ResponseCreated { response } => {
            tracing::debug!(response_id = %response.id, "Response created");
            None
        }
        ServerEvent::ResponseDone { response } => {
            tracing::debug!(response_id = %response.id, status = %response.status, "Response done");
            Some(UpstreamEvent::ResponseCompleted)
        }
        ServerEvent::AudioDelta { delta, .. } => match ServerEvent::decode_audio_delta(&delta) {
            Ok(audio) => Some(UpstreamEvent::AudioDelta(Bytes::from(audio))),
            Err(e) => {
                tracing::warn!("Failed to decode audio delta: {}", e);
                None
            }
        },
        ServerEvent::AudioTranscriptDelta { response_id, delta } => {
            tracing::debug!(response_id = %response_id, "Assistant transcript: {}", delta);
            None
        }
        ServerEvent::Error { error } => {
            tracing::warn!(
                "OpenAI Realtime error: {} - {}",
                error.error_type,
                error.message
            );
            Some(UpstreamEvent::RemoteError {
                code: error.code_or_type(),
                message: error.message,
            })
        }
        ServerEvent::Unknown => None,
    }
}

#[async_trait]
impl UpstreamSession for OpenAIRealtime {
    fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn send_audio(&mut self, audio: Bytes) {
        let open = *self.state.read() == ConnectionState::Open;
        let queued = match (open, self.ws_sender.as_ref()) {
            (true, Some(sender)) => sender.try_send(ClientEvent::audio_append(&audio)).is_ok(),
            _ => false,
        };
        if !queued {
            self.dropped_audio += 1;
            tracing::debug!(
                dropped = self.dropped_audio,
                "Upstream not writable, dropping audio chunk"
            );
        }
    }

    async fn commit_audio(&mut self) -> RealtimeResult<()> {
        self.send_event(ClientEvent::InputAudioBufferCommit).await
    }

    async fn request_response(&mut self, instructions: Option<String>) -> RealtimeResult<()> {
        self.send_event(ClientEvent::response_create(instructions))
            .await
    }

    async fn close(&mut self) {
        *self.state.write() = ConnectionState::Closed;
        // Dropping the sender asks the task to send a close frame and exit.
        self.ws_sender = None;

        if let Some(mut handle) = self.connection_handle.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut handle).await.is_err() {
                tracing::warn!("Connection task did not stop in time, aborting");
                handle.abort();
            }
            tracing::info!(session_id = ?self.session_id(), "Disconnected from OpenAI Realtime API");
        }
    }

    fn dropped_audio_chunks(&self) -> u64 {
        self.dropped_audio
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens [`OpenAIRealtime`] sessions with process-wide credentials.
pub struct OpenAIRealtimeConnector {
    api_key: String,
    url: String,
    model: String,
}

impl OpenAIRealtimeConnector {
    pub fn new(api_key: impl Into<String>, url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            url: url.into(),
            model: model.into(),
        }
    }
}

impl Drop for OpenAIRealtimeConnector {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

#[async_trait]
impl RealtimeConnector for OpenAIRealtimeConnector {
    async fn connect(
        &self,
        mut config: RealtimeConfig,
        events: mpsc::Sender<UpstreamEvent>,
    ) -> RealtimeResult<BoxedUpstream> {
        if config.api_key.is_empty() {
            config.api_key = self.api_key.clone();
        }
        if config.url.is_empty() {
            config.url = self.url.clone();
        }
        if config.model.is_empty() {
            config.model = self.model.clone();
        }

        let mut session = OpenAIRealtime::new(config)?;
        session.connect(events).await?;
        Ok(Box::new(session))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::base::TurnDetectionConfig;

    fn test_config() -> RealtimeConfig {
        RealtimeConfig {
            api_key: "test_key".to_string(),
            voice: Some("shimmer".to_string()),
            instructions: Some("Be brief".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_openai_realtime_creation() {
        let realtime = OpenAIRealtime::new(test_config()).unwrap();
        assert_eq!(realtime.connection_state(), ConnectionState::Connecting);
        assert_eq!(realtime.voice(), "shimmer");
        assert!(realtime.session_id().is_none());
    }

    #[test]
    fn test_api_key_required() {
        let result = OpenAIRealtime::new(RealtimeConfig::default());
        match result {
            Err(RealtimeError::AuthenticationFailed(_)) => {}
            _ => panic!("Expected AuthenticationFailed error"),
        }
    }

    #[test]
    fn test_session_config_uses_ulaw_and_manual_responses() {
        let mut config = test_config();
        config.turn_detection = TurnDetectionConfig {
            threshold: 0.7,
            prefix_padding_ms: 200,
            silence_duration_ms: 800,
        };
        let realtime = OpenAIRealtime::new(config).unwrap();
        let session = realtime.build_session_config();

        assert_eq!(session.input_audio_format.as_deref(), Some("g711_ulaw"));
        assert_eq!(session.output_audio_format.as_deref(), Some("g711_ulaw"));
        assert_eq!(session.voice.as_deref(), Some("shimmer"));
        assert_eq!(session.instructions.as_deref(), Some("Be brief"));
        assert_eq!(
            session.turn_detection,
            Some(TurnDetection::ServerVad {
                threshold: Some(0.7),
                prefix_padding_ms: Some(200),
                silence_duration_ms: Some(800),
                create_response: Some(false),
            })
        );
    }

    #[test]
    fn test_unlisted_voice_is_sent_as_given() {
        let mut config = test_config();
        config.voice = Some("studio-narrator".to_string());
        let realtime = OpenAIRealtime::new(config).unwrap();
        assert_eq!(
            realtime.build_session_config().voice.as_deref(),
            Some("studio-narrator")
        );

        let mut config = test_config();
        config.voice = Some("marin".to_string());
        let realtime = OpenAIRealtime::new(config).unwrap();
        assert_eq!(realtime.build_session_config().voice.as_deref(), Some("marin"));
    }

    #[test]
    fn test_missing_voice_uses_default() {
        let mut config = test_config();
        config.voice = Some("  ".to_string());
        let realtime = OpenAIRealtime::new(config).unwrap();
        assert_eq!(realtime.voice(), "alloy");
    }

    #[tokio::test]
    async fn test_send_audio_before_connect_is_counted() {
        let mut realtime = OpenAIRealtime::new(test_config()).unwrap();
        realtime.send_audio(Bytes::from_static(&[0xFF; 160]));
        realtime.send_audio(Bytes::from_static(&[0xFF; 160]));
        assert_eq!(realtime.dropped_audio_chunks(), 2);
    }

    #[tokio::test]
    async fn test_request_response_requires_connection() {
        let mut realtime = OpenAIRealtime::new(test_config()).unwrap();
        match realtime.request_response(None).await {
            Err(RealtimeError::NotConnected) => {}
            other => panic!("Expected NotConnected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let mut realtime = OpenAIRealtime::new(test_config()).unwrap();
        realtime.close().await;
        realtime.close().await;
        assert_eq!(realtime.connection_state(), ConnectionState::Closed);

        let (tx, _rx) = mpsc::channel(1);
        match realtime.connect(tx).await {
            Err(RealtimeError::SessionClosed) => {}
            other => panic!("Expected SessionClosed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handshake_failure_closes_session() {
        let mut config = test_config();
        // Nothing listens on port 9 locally.
        config.url = "ws://127.0.0.1:9/v1/realtime".to_string();
        let mut realtime = OpenAIRealtime::new(config).unwrap();
        let (tx, _rx) = mpsc::channel(1);

        assert!(realtime.connect(tx).await.is_err());
        assert_eq!(realtime.connection_state(), ConnectionState::Closed);
    }

    #[test]
    fn test_translate_error_event() {
        let session_id = RwLock::new(None);
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"error","error":{"type":"invalid_request_error","code":"bad","message":"nope"}}"#,
        )
        .unwrap();
        assert_eq!(
            translate_server_event(event, &session_id),
            Some(UpstreamEvent::RemoteError {
                code: "bad".to_string(),
                message: "nope".to_string()
            })
        );
    }

    #[test]
    fn test_translate_session_created_records_id() {
        let session_id = RwLock::new(None);
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"session.created","session":{"id":"sess_1","model":"m"}}"#,
        )
        .unwrap();
        assert_eq!(translate_server_event(event, &session_id), None);
        assert_eq!(session_id.read().as_deref(), Some("sess_1"));
    }
}
