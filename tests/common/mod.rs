//! Shared test doubles for bridge-level integration tests
//!
//! - `MockConnector` / `MockUpstream` record every command a bridge issues and
//!   hand the test the event sender of the opened session
//! - `MockSink` records outbound audio and close statuses
//! - `FixedResolver` returns a canned profile, error, or delay

// Not every test binary uses every helper
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use callbridge::ServerConfig;
use callbridge::core::agent_config::{
    AgentConfigResolver, AgentProfile, DEFAULT_SYSTEM_PROMPT, DEFAULT_WELCOME_MESSAGE,
    ResolveError,
};
use callbridge::core::bridge::{BridgeContext, BridgeSettings, CallBridge, CallSummary};
use callbridge::core::realtime::{
    BoxedUpstream, ConnectionState, RealtimeConfig, RealtimeConnector, RealtimeError,
    RealtimeResult, UpstreamEvent, UpstreamSession,
};
use callbridge::core::registry::CallRegistry;
use callbridge::core::telephony::{CloseStatus, DownstreamEvent, MediaSink, RoutingAttributes};

/// How long a test waits for an expected command before failing
pub const WAIT: Duration = Duration::from_secs(2);

// =============================================================================
// Upstream
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamCommand {
    Configure {
        voice: Option<String>,
        instructions: Option<String>,
    },
    Audio(usize),
    Commit,
    RequestResponse(Option<String>),
    Close,
}

pub struct MockConnector {
    commands: mpsc::UnboundedSender<UpstreamCommand>,
    events: Arc<Mutex<Option<mpsc::Sender<UpstreamEvent>>>>,
    connects: AtomicUsize,
    connect_delay: Duration,
    fail_connect: bool,
    fail_requests: Arc<AtomicBool>,
}

/// Test-side view of a [`MockConnector`].
pub struct MockHandle {
    pub commands: mpsc::UnboundedReceiver<UpstreamCommand>,
    events: Arc<Mutex<Option<mpsc::Sender<UpstreamEvent>>>>,
    connector: Arc<MockConnector>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, MockHandle) {
        Self::build(Duration::ZERO, false)
    }

    pub fn slow(delay: Duration) -> (Arc<Self>, MockHandle) {
        Self::build(delay, false)
    }

    pub fn failing() -> (Arc<Self>, MockHandle) {
        Self::build(Duration::ZERO, true)
    }

    fn build(connect_delay: Duration, fail_connect: bool) -> (Arc<Self>, MockHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = Arc::new(Mutex::new(None));
        let connector = Arc::new(Self {
            commands: tx,
            events: events.clone(),
            connects: AtomicUsize::new(0),
            connect_delay,
            fail_connect,
            fail_requests: Arc::new(AtomicBool::new(false)),
        });
        let handle = MockHandle {
            commands: rx,
            events,
            connector: connector.clone(),
        };
        (connector, handle)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeConnector for MockConnector {
    async fn connect(
        &self,
        config: RealtimeConfig,
        events: mpsc::Sender<UpstreamEvent>,
    ) -> RealtimeResult<BoxedUpstream> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if self.fail_connect {
            return Err(RealtimeError::ConnectionFailed("mock refused".to_string()));
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.events.lock() = Some(events);
        let _ = self.commands.send(UpstreamCommand::Configure {
            voice: config.voice.clone(),
            instructions: config.instructions.clone(),
        });

        Ok(Box::new(MockUpstream {
            commands: self.commands.clone(),
            state: ConnectionState::Open,
            fail_requests: self.fail_requests.clone(),
        }))
    }
}

pub struct MockUpstream {
    commands: mpsc::UnboundedSender<UpstreamCommand>,
    state: ConnectionState,
    fail_requests: Arc<AtomicBool>,
}

#[async_trait]
impl UpstreamSession for MockUpstream {
    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    fn send_audio(&mut self, audio: Bytes) {
        let _ = self.commands.send(UpstreamCommand::Audio(audio.len()));
    }

    async fn commit_audio(&mut self) -> RealtimeResult<()> {
        let _ = self.commands.send(UpstreamCommand::Commit);
        Ok(())
    }

    async fn request_response(&mut self, instructions: Option<String>) -> RealtimeResult<()> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(RealtimeError::NotConnected);
        }
        let _ = self
            .commands
            .send(UpstreamCommand::RequestResponse(instructions));
        Ok(())
    }

    async fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            let _ = self.commands.send(UpstreamCommand::Close);
        }
    }

    fn dropped_audio_chunks(&self) -> u64 {
        0
    }
}

impl MockHandle {
    /// Wait for the next recorded command.
    pub async fn next_command(&mut self) -> UpstreamCommand {
        tokio::time::timeout(WAIT, self.commands.recv())
            .await
            .expect("timed out waiting for upstream command")
            .expect("connector dropped")
    }

    /// Assert nothing further is recorded within a short window.
    pub async fn assert_quiet(&mut self) {
        let res = tokio::time::timeout(Duration::from_millis(100), self.commands.recv()).await;
        assert!(res.is_err(), "unexpected upstream command: {:?}", res);
    }

    /// Push an event as if the remote had sent it.
    pub async fn emit(&self, event: UpstreamEvent) {
        let tx = self
            .events
            .lock()
            .clone()
            .expect("upstream not connected yet");
        tx.send(event).await.expect("bridge stopped listening");
    }

    /// Drop the event sender, which the bridge sees as the remote hanging up.
    pub fn hang_up(&self) {
        self.events.lock().take();
    }

    pub fn fail_requests(&self, fail: bool) {
        self.connector.fail_requests.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connector.connects()
    }
}

// =============================================================================
// Downstream
// =============================================================================

#[derive(Default)]
pub struct SinkRecord {
    pub audio: Mutex<Vec<(String, Vec<u8>)>>,
    pub closes: Mutex<Vec<Option<CloseStatus>>>,
    pub open: AtomicBool,
    pub dropped: AtomicU64,
}

impl SinkRecord {
    pub fn close_count(&self) -> usize {
        self.closes.lock().len()
    }

    pub fn last_close(&self) -> Option<CloseStatus> {
        self.closes.lock().last().cloned().flatten()
    }
}

pub struct MockSink {
    record: Arc<SinkRecord>,
}

impl MockSink {
    pub fn new() -> (Self, Arc<SinkRecord>) {
        let record = Arc::new(SinkRecord::default());
        record.open.store(true, Ordering::SeqCst);
        (
            Self {
                record: record.clone(),
            },
            record,
        )
    }
}

#[async_trait]
impl MediaSink for MockSink {
    fn send_audio(&mut self, stream_id: &str, audio: &[u8]) -> bool {
        if !self.record.open.load(Ordering::SeqCst) {
            self.record.dropped.fetch_add(1, Ordering::SeqCst);
            return false;
        }
        self.record
            .audio
            .lock()
            .push((stream_id.to_string(), audio.to_vec()));
        true
    }

    async fn close(&mut self, status: Option<CloseStatus>) {
        if self.record.open.swap(false, Ordering::SeqCst) {
            self.record.closes.lock().push(status);
        }
    }

    fn is_open(&self) -> bool {
        self.record.open.load(Ordering::SeqCst)
    }

    fn dropped_chunks(&self) -> u64 {
        self.record.dropped.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Resolver
// =============================================================================

pub enum Lookup {
    Found(AgentProfile),
    NotFound,
    Fails,
}

pub struct FixedResolver {
    lookup: Lookup,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl FixedResolver {
    pub fn new(lookup: Lookup) -> Arc<Self> {
        Self::delayed(lookup, Duration::ZERO)
    }

    pub fn delayed(lookup: Lookup, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            lookup,
            delay,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AgentConfigResolver for FixedResolver {
    async fn resolve(
        &self,
        _routing: &RoutingAttributes,
    ) -> Result<Option<AgentProfile>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.lookup {
            Lookup::Found(profile) => Ok(Some(profile.clone())),
            Lookup::NotFound => Ok(None),
            Lookup::Fails => Err(ResolveError::Timeout),
        }
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A valid configuration listening on an ephemeral local port.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        tls: None,
        openai_api_key: Some("sk-test".to_string()),
        realtime_url: "ws://127.0.0.1:9/v1/realtime".to_string(),
        realtime_model: "gpt-4o-realtime-preview".to_string(),
        realtime_commit_on_speech_stopped: false,
        agent_config_url: None,
        agent_config_timeout_seconds: 5,
        default_system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        default_welcome_message: DEFAULT_WELCOME_MESSAGE.to_string(),
        default_voice: "alloy".to_string(),
        max_concurrent_calls: None,
        shutdown_grace_seconds: 1,
        cors_allowed_origins: None,
    }
}

pub fn context(
    registry: CallRegistry,
    resolver: Arc<dyn AgentConfigResolver>,
    connector: Arc<dyn RealtimeConnector>,
    settings: BridgeSettings,
) -> BridgeContext {
    BridgeContext {
        registry,
        resolver,
        connector,
        settings: Arc::new(settings),
        shutdown: CancellationToken::new(),
    }
}

/// A running bridge plus the sender feeding its downstream leg.
pub struct RunningCall {
    pub downstream: mpsc::Sender<DownstreamEvent>,
    pub task: JoinHandle<CallSummary>,
    pub sink: Arc<SinkRecord>,
}

impl RunningCall {
    pub fn spawn(ctx: BridgeContext) -> Self {
        let (sink, record) = MockSink::new();
        let (tx, rx) = mpsc::channel(64);
        let bridge = CallBridge::new(ctx, Box::new(sink));
        let task = tokio::spawn(bridge.run(rx));
        Self {
            downstream: tx,
            task,
            sink: record,
        }
    }

    pub async fn send(&self, event: DownstreamEvent) {
        self.downstream
            .send(event)
            .await
            .expect("bridge stopped listening");
    }

    pub async fn start(&self, call_id: &str, stream_id: &str) {
        self.send(DownstreamEvent::StreamStart {
            call_id: call_id.to_string(),
            stream_id: stream_id.to_string(),
            routing: RoutingAttributes {
                to: Some("+15550001111".to_string()),
                ..Default::default()
            },
        })
        .await;
    }

    pub async fn finish(self) -> CallSummary {
        drop(self.downstream);
        Self::join(self.task).await
    }

    pub async fn join(task: JoinHandle<CallSummary>) -> CallSummary {
        tokio::time::timeout(WAIT, task)
            .await
            .expect("bridge did not finish")
            .expect("bridge task panicked")
    }
}
