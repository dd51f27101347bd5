use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
};

use crate::AppState;
use crate::ws;

/// Upgrade endpoint; the path segment becomes the connection's display name.
pub async fn websocket_handler(
    State(state): State<AppState>,
    Path(username): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let limit = state.connection_config.max_message_bytes;
    let ctx = state.socket_context();

    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| ws::serve_socket(socket, username, ctx))
}
