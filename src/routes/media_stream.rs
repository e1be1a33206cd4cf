//! Media stream WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::media_stream_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the telephony media stream router
///
/// # Endpoint
///
/// `GET /media-stream` - WebSocket upgrade, one phone call per connection
///
/// # Protocol
///
/// The telephony provider sends JSON text frames tagged by `event`:
/// `connected`, then `start` (call and stream identifiers plus custom
/// parameters used for agent lookup), then `media` frames of base64 G.711
/// μ-law audio, and finally `stop`.
///
/// The server replies with `media` frames addressed to the stream:
///
/// ```json
/// {"event": "media", "streamSid": "MZ...", "media": {"payload": "<base64 μ-law>"}}
/// ```
pub fn create_media_stream_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media-stream", get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
}
