//! Downstream media connection.
//!
//! [`TelephonySession::start`] splits an upgraded WebSocket into a writer
//! task fed by [`TelephonySink`] and a reader task that parses frames into
//! [`DownstreamEvent`]s. The event receiver yields `None` once the socket is
//! gone.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::messages::{DownstreamEvent, OutboundFrame, parse_frame};

/// Outbound frames queued ahead of the socket writer.
const OUTBOUND_CHANNEL_CAPACITY: usize = 1024;

/// Parsed events queued ahead of the bridge.
const INBOUND_CHANNEL_CAPACITY: usize = 1024;

/// How long `close()` waits for the writer to flush the close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Status sent with the WebSocket close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    pub code: u16,
    pub reason: String,
}

impl CloseStatus {
    /// 1011: the server hit a condition that prevented it from serving the call.
    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self {
            code: close_code::ERROR,
            reason: reason.into(),
        }
    }

    /// 1013: the server is at capacity.
    pub fn try_again_later(reason: impl Into<String>) -> Self {
        Self {
            code: close_code::AGAIN,
            reason: reason.into(),
        }
    }

    /// 1008: the request violated server policy.
    pub fn policy(reason: impl Into<String>) -> Self {
        Self {
            code: close_code::POLICY,
            reason: reason.into(),
        }
    }
}

/// Outbound half of a media connection, exclusively owned by a call bridge.
#[async_trait]
pub trait MediaSink: Send + Sync {
    /// Queue one audio chunk for the given stream. Returns `false` when the
    /// chunk was dropped.
    ///
    /// Chunks are dropped and counted when the connection is not open or
    /// the outbound queue is full.
    fn send_audio(&mut self, stream_id: &str, audio: &[u8]) -> bool;

    /// Close the connection, optionally with a status frame. Idempotent.
    async fn close(&mut self, status: Option<CloseStatus>);

    /// Whether the connection still accepts frames.
    fn is_open(&self) -> bool;

    /// Chunks dropped by [`send_audio`](Self::send_audio).
    fn dropped_chunks(&self) -> u64;
}

enum WriterCommand {
    Frame(String),
    Close(Option<CloseStatus>),
}

/// Factory for the two halves of a media connection.
pub struct TelephonySession;

impl TelephonySession {
    /// Take ownership of an upgraded socket and spawn its reader and writer.
    pub fn start(socket: WebSocket) -> (TelephonySink, mpsc::Receiver<DownstreamEvent>) {
        let (mut sender, mut receiver) = socket.split();
        let (frame_tx, mut frame_rx) = mpsc::channel::<WriterCommand>(OUTBOUND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<DownstreamEvent>(INBOUND_CHANNEL_CAPACITY);

        let open = Arc::new(AtomicBool::new(true));

        let writer_open = open.clone();
        let writer = tokio::spawn(async move {
            while let Some(command) = frame_rx.recv().await {
                let result = match command {
                    WriterCommand::Frame(json) => sender.send(Message::Text(json.into())).await,
                    WriterCommand::Close(status) => {
                        let frame = status.map(|s| CloseFrame {
                            code: s.code,
                            reason: s.reason.into(),
                        });
                        info!(?frame, "Closing media stream WebSocket");
                        let _ = sender.send(Message::Close(frame)).await;
                        break;
                    }
                };

                if let Err(e) = result {
                    error!("Failed to send media stream frame: {}", e);
                    break;
                }
            }
            writer_open.store(false, Ordering::SeqCst);
        });

        let reader_open = open.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let event = match parse_frame(&text) {
                            Ok(Some(event)) => event,
                            Ok(None) => continue,
                            Err(e) => DownstreamEvent::Malformed(e),
                        };
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        debug!(len = data.len(), "Ignoring binary media stream frame");
                    }
                    Ok(Message::Close(frame)) => {
                        info!(?frame, "Media stream WebSocket closed by peer");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Media stream WebSocket error: {}", e);
                        break;
                    }
                }
            }
            reader_open.store(false, Ordering::SeqCst);
        });

        let sink = TelephonySink {
            tx: Some(frame_tx),
            open,
            writer: Some(writer),
            reader: Some(reader),
            dropped: 0,
        };
        (sink, event_rx)
    }
}

/// Writer handle for a media connection opened by [`TelephonySession`].
pub struct TelephonySink {
    tx: Option<mpsc::Sender<WriterCommand>>,
    open: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    dropped: u64,
}

#[async_trait]
impl MediaSink for TelephonySink {
    fn send_audio(&mut self, stream_id: &str, audio: &[u8]) -> bool {
        let queued = match self.tx.as_ref() {
            Some(tx) if self.open.load(Ordering::SeqCst) => {
                match OutboundFrame::media(stream_id, audio).to_json() {
                    Ok(json) => tx.try_send(WriterCommand::Frame(json)).is_ok(),
                    Err(e) => {
                        error!("{}", e);
                        false
                    }
                }
            }
            _ => false,
        };
        if !queued {
            self.dropped += 1;
        }
        queued
    }

    async fn close(&mut self, status: Option<CloseStatus>) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        self.open.store(false, Ordering::SeqCst);
        let _ = tx.send(WriterCommand::Close(status)).await;
        drop(tx);

        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut writer).await.is_err() {
                writer.abort();
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn is_open(&self) -> bool {
        self.tx.is_some() && self.open.load(Ordering::SeqCst)
    }

    fn dropped_chunks(&self) -> u64 {
        self.dropped
    }
}

impl Drop for TelephonySink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
