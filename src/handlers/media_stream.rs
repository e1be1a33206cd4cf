//! Telephony media stream WebSocket handler
//!
//! Each accepted connection carries exactly one phone call. The socket is
//! split into a [`TelephonySink`](crate::core::telephony::TelephonySink) and an
//! inbound event channel, and a [`CallBridge`] owns the call from there.

use axum::{
    extract::{State, ws::WebSocketUpgrade},
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::bridge::CallBridge;
use crate::core::telephony::TelephonySession;
use crate::state::AppState;

/// Maximum WebSocket frame size (1 MB). Media frames are a few hundred bytes.
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size (1 MB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Upgrade `GET /media-stream` and bridge the call until either side hangs up.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!(
        active_calls = state.registry.len(),
        "Media stream WebSocket upgrade requested"
    );

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| async move {
            let (sink, events) = TelephonySession::start(socket);
            let bridge = CallBridge::new(state.bridge_context(), Box::new(sink));
            let summary = bridge.run(events).await;
            debug!(
                call_id = summary.call_id.as_deref().unwrap_or("-"),
                final_state = %summary.final_state,
                "Media stream WebSocket closed"
            );
        })
}
