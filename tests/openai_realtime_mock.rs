//! OpenAI Realtime adapter against an in-process WebSocket server
//!
//! These tests verify:
//! - Handshake URL and headers
//! - The `session.update` sent on connect
//! - Translation of server events into bridge notifications
//! - Client commands on the wire
//! - Close and remote hang-up handling

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;

use callbridge::core::realtime::{
    BoxedUpstream, ConnectionState, OpenAIRealtimeConnector, RealtimeConfig, RealtimeConnector,
    RealtimeError, UpstreamEvent,
};

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct Handshake {
    uri: String,
    authorization: Option<String>,
    beta: Option<String>,
}

#[derive(Debug)]
enum ServerSaw {
    Event(Value),
    Closed,
}

struct MockRealtimeServer {
    url: String,
    handshake: oneshot::Receiver<Handshake>,
    received: mpsc::UnboundedReceiver<ServerSaw>,
    /// Dropping this makes the server hang up
    outgoing: Option<mpsc::UnboundedSender<Message>>,
}

impl MockRealtimeServer {
    async fn start(reject_with: Option<u16>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/v1/realtime", listener.local_addr().unwrap());

        let (info_tx, info_rx) = oneshot::channel();
        let (saw_tx, saw_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback =
                move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let header = |name: &str| {
                        req.headers()
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string)
                    };
                    let _ = info_tx.send(Handshake {
                        uri: req.uri().to_string(),
                        authorization: header("authorization"),
                        beta: header("openai-beta"),
                    });
                    match reject_with {
                        Some(status) => Err(http::Response::builder()
                            .status(status)
                            .body(Some("rejected".to_string()))
                            .unwrap()),
                        None => Ok(resp),
                    }
                };
            let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
                return;
            };

            loop {
                tokio::select! {
                    incoming = ws.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let value: Value = serde_json::from_str(&text).unwrap();
                            let _ = saw_tx.send(ServerSaw::Event(value));
                        }
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                            let _ = saw_tx.send(ServerSaw::Closed);
                            break;
                        }
                        Some(Ok(_)) => {}
                    },
                    outgoing = out_rx.recv() => match outgoing {
                        Some(message) => {
                            if ws.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = ws.close(None).await;
                            break;
                        }
                    },
                }
            }
        });

        Self {
            url,
            handshake: info_rx,
            received: saw_rx,
            outgoing: Some(out_tx),
        }
    }

    fn send(&self, event: Value) {
        self.outgoing
            .as_ref()
            .unwrap()
            .send(Message::Text(event.to_string().into()))
            .unwrap();
    }

    async fn next_event(&mut self) -> Value {
        match tokio::time::timeout(WAIT, self.received.recv()).await {
            Ok(Some(ServerSaw::Event(value))) => value,
            other => panic!("expected a client event, got {other:?}"),
        }
    }

    async fn expect_closed(&mut self) {
        match tokio::time::timeout(WAIT, self.received.recv()).await {
            Ok(Some(ServerSaw::Closed)) => {}
            other => panic!("expected close, got {other:?}"),
        }
    }

    fn hang_up(&mut self) {
        self.outgoing.take();
    }
}

async fn connect(
    url: &str,
    config: RealtimeConfig,
) -> (
    Result<BoxedUpstream, RealtimeError>,
    mpsc::Receiver<UpstreamEvent>,
) {
    let connector = OpenAIRealtimeConnector::new("sk-test", url, "gpt-4o-realtime-preview");
    let (tx, rx) = mpsc::channel(64);
    (connector.connect(config, tx).await, rx)
}

async fn next_notification(rx: &mut mpsc::Receiver<UpstreamEvent>) -> Option<UpstreamEvent> {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for upstream event")
}

#[tokio::test]
async fn test_handshake_and_session_update() {
    let mut server = MockRealtimeServer::start(None).await;
    let config = RealtimeConfig {
        voice: Some("verse".to_string()),
        instructions: Some("Be brief.".to_string()),
        temperature: Some(0.7),
        ..Default::default()
    };
    let (result, _events) = connect(&server.url, config).await;
    let mut session = match result {
        Ok(session) => session,
        Err(e) => panic!("connect failed: {e}"),
    };
    assert_eq!(session.connection_state(), ConnectionState::Open);

    let handshake = (&mut server.handshake).await.unwrap();
    assert_eq!(handshake.uri, "/v1/realtime?model=gpt-4o-realtime-preview");
    assert_eq!(handshake.authorization.as_deref(), Some("Bearer sk-test"));
    assert_eq!(handshake.beta.as_deref(), Some("realtime=v1"));

    let update = server.next_event().await;
    assert_eq!(update["type"], "session.update");
    let s = &update["session"];
    assert_eq!(s["voice"], "verse");
    assert_eq!(s["instructions"], "Be brief.");
    assert_eq!(s["input_audio_format"], "g711_ulaw");
    assert_eq!(s["output_audio_format"], "g711_ulaw");
    assert_eq!(s["turn_detection"]["type"], "server_vad");
    assert_eq!(s["turn_detection"]["create_response"], false);
    assert_eq!(s["turn_detection"]["silence_duration_ms"], 500);

    session.close().await;
    server.expect_closed().await;
}

#[tokio::test]
async fn test_server_events_translated() {
    let mut server = MockRealtimeServer::start(None).await;
    let (result, mut events) = connect(&server.url, RealtimeConfig::default()).await;
    let mut session = match result {
        Ok(session) => session,
        Err(e) => panic!("connect failed: {e}"),
    };
    let _ = server.next_event().await;

    server.send(json!({"type": "session.created", "event_id": "e1", "session": {"id": "sess_1", "model": "gpt-4o-realtime-preview", "voice": "alloy"}}));
    server.send(json!({"type": "input_audio_buffer.speech_started", "audio_start_ms": 120, "item_id": "i1"}));
    server.send(json!({"type": "input_audio_buffer.speech_stopped", "audio_end_ms": 900, "item_id": "i1"}));
    server.send(json!({"type": "rate_limits.updated", "rate_limits": []}));
    server.send(json!({"type": "response.audio.delta", "response_id": "r1", "item_id": "i2", "delta": BASE64_STANDARD.encode([1u8, 2, 3])}));
    server.send(json!({"type": "response.audio_transcript.delta", "response_id": "r1", "delta": "Hi"}));
    server.send(json!({"type": "response.done", "response": {"id": "r1", "status": "completed"}}));
    server.send(json!({"type": "error", "error": {"type": "invalid_request_error", "code": "conversation_already_has_active_response", "message": "busy"}}));
    server.send(json!({"type": "error", "error": {"type": "server_error", "message": "boom"}}));

    assert_eq!(
        next_notification(&mut events).await,
        Some(UpstreamEvent::SpeechStopped)
    );
    assert_eq!(
        next_notification(&mut events).await,
        Some(UpstreamEvent::AudioDelta(Bytes::from_static(&[1, 2, 3])))
    );
    assert_eq!(
        next_notification(&mut events).await,
        Some(UpstreamEvent::ResponseCompleted)
    );
    assert_eq!(
        next_notification(&mut events).await,
        Some(UpstreamEvent::RemoteError {
            code: "conversation_already_has_active_response".to_string(),
            message: "busy".to_string(),
        })
    );
    assert_eq!(
        next_notification(&mut events).await,
        Some(UpstreamEvent::RemoteError {
            code: "server_error".to_string(),
            message: "boom".to_string(),
        })
    );

    session.close().await;
    // The connection task owned the event sender
    assert_eq!(next_notification(&mut events).await, None);
}

#[tokio::test]
async fn test_client_commands_on_the_wire() {
    let mut server = MockRealtimeServer::start(None).await;
    let (result, _events) = connect(&server.url, RealtimeConfig::default()).await;
    let mut session = match result {
        Ok(session) => session,
        Err(e) => panic!("connect failed: {e}"),
    };
    let _ = server.next_event().await;

    session.send_audio(Bytes::from_static(&[0xFF; 4]));
    let append = server.next_event().await;
    assert_eq!(append["type"], "input_audio_buffer.append");
    assert_eq!(append["audio"], BASE64_STANDARD.encode([0xFFu8; 4]));

    session.commit_audio().await.unwrap();
    assert_eq!(server.next_event().await["type"], "input_audio_buffer.commit");

    session
        .request_response(Some("Greet the caller.".to_string()))
        .await
        .unwrap();
    let greeting = server.next_event().await;
    assert_eq!(greeting["type"], "response.create");
    assert_eq!(greeting["response"]["instructions"], "Greet the caller.");

    session.request_response(None).await.unwrap();
    let plain = server.next_event().await;
    assert_eq!(plain["type"], "response.create");
    assert!(plain.get("response").is_none());

    session.close().await;
    server.expect_closed().await;
    assert_eq!(session.connection_state(), ConnectionState::Closed);
    assert!(matches!(
        session.request_response(None).await,
        Err(RealtimeError::NotConnected)
    ));

    session.send_audio(Bytes::from_static(&[0xFF; 4]));
    assert_eq!(session.dropped_audio_chunks(), 1);
}

#[tokio::test]
async fn test_unauthorized_handshake() {
    let server = MockRealtimeServer::start(Some(401)).await;
    let (result, _events) = connect(&server.url, RealtimeConfig::default()).await;
    match result {
        Err(RealtimeError::AuthenticationFailed(_)) => {}
        Err(other) => panic!("expected authentication failure, got {other}"),
        Ok(_) => panic!("expected handshake to be rejected"),
    }
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    // Bind and drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/v1/realtime", listener.local_addr().unwrap());
    drop(listener);

    let (result, _events) = connect(&url, RealtimeConfig::default()).await;
    assert!(matches!(result, Err(RealtimeError::ConnectionFailed(_))));
}

#[tokio::test]
async fn test_remote_hang_up_closes_event_channel() {
    let mut server = MockRealtimeServer::start(None).await;
    let (result, mut events) = connect(&server.url, RealtimeConfig::default()).await;
    let mut session = match result {
        Ok(session) => session,
        Err(e) => panic!("connect failed: {e}"),
    };
    let _ = server.next_event().await;

    server.hang_up();
    assert_eq!(next_notification(&mut events).await, None);
    assert_eq!(session.connection_state(), ConnectionState::Closed);

    session.send_audio(Bytes::from_static(&[0x7F; 160]));
    assert_eq!(session.dropped_audio_chunks(), 1);
    session.close().await;
}
