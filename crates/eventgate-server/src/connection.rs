//! WebSocket upgrade and per-connection read/write loops.
//!
//! Each accepted connection gets a write task draining the session's
//! outbound channel and a read loop feeding frames to the dispatcher. The
//! close path marks the session disconnected; eviction is the reaper's job.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::metrics::{WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Handshake query parameters.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Stable client identity; required.
    #[serde(rename = "clientId")]
    client_id: Option<String>,
    /// Truthy when the client is resuming and wants its queue replayed.
    reconnect: Option<String>,
}

impl ConnectParams {
    fn reconnect(&self) -> bool {
        matches!(self.reconnect.as_deref(), Some("true" | "1"))
    }
}

/// WebSocket upgrade handler for `/ws`.
///
/// A connection without a client identity is rejected before the upgrade;
/// every session must be addressable for delivery and eviction.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(client_id) = params.client_id.clone().filter(|id| !id.is_empty()) else {
        warn!("rejecting connection without clientId");
        return (StatusCode::BAD_REQUEST, "missing clientId query parameter").into_response();
    };
    let reconnect = params.reconnect();
    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id, reconnect))
        .into_response()
}

/// Drive one accepted connection until it closes.
async fn handle_socket(socket: WebSocket, state: AppState, client_id: String, reconnect: bool) {
    metrics::counter!(WS_CONNECTIONS_TOTAL).increment(1);
    info!(client_id, reconnect, "websocket client connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    // Kept so the close path can prove it still owns the session's handle;
    // a reconnect on the same clientId rebinds the session away from us.
    let handle = tx.clone();
    let session = state.gate.connect(&client_id, reconnect, tx).await;

    // Write task: drain the session's outbound channel onto the socket.
    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.as_str().into())).await.is_err() {
                break;
            }
        }
    });

    // Read loop: every text frame is one envelope.
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                state.gate.dispatch_message(&session, text.as_str()).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            // Pings are answered by axum; other frame kinds carry nothing.
            Ok(_) => {}
        }
    }

    state.gate.disconnect(&session, &handle);
    write_task.abort();
    metrics::counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    debug!(client_id, "websocket client disconnected");
}
