//! WebSocket control connection
//!
//! Each socket registers with the supervisor, forwards the events addressed
//! to it as JSON text frames and submits decoded inbound envelopes. Frames
//! that fail to decode are logged and dropped; the connection stays open.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use kara_common::protocol;
use tracing::{debug, info, warn};

use super::AppContext;
use crate::supervisor::{ConnectionId, SupervisorHandle};

/// GET /ws - upgrade to a control connection
pub async fn control_socket(ws: WebSocketUpgrade, State(ctx): State<AppContext>) -> Response {
    ws.on_upgrade(move |socket| run_connection(socket, ctx.supervisor))
}

async fn run_connection(socket: WebSocket, supervisor: SupervisorHandle) {
    let (conn, mut events) = match supervisor.open_connection() {
        Ok(registered) => registered,
        Err(e) => {
            warn!("Rejecting control connection: {}", e);
            return;
        }
    };
    info!(%conn, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();

    let mut outbound = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize {}: {}", event.type_name(), e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let inbound_supervisor = supervisor.clone();
    let mut inbound = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let raw = match frame {
                Ok(Message::Text(text)) => text.into_bytes(),
                Ok(Message::Binary(bytes)) => bytes,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(%conn, "WebSocket read error: {}", e);
                    break;
                }
            };
            if !submit_frame(&inbound_supervisor, conn, &raw) {
                break;
            }
        }
    });

    // Whichever side ends first takes the other down
    tokio::select! {
        _ = &mut outbound => inbound.abort(),
        _ = &mut inbound => outbound.abort(),
    }

    supervisor.close_connection(conn);
    info!(%conn, "WebSocket disconnected");
}

/// Decode and submit one frame; false once the supervisor is gone
fn submit_frame(supervisor: &SupervisorHandle, conn: ConnectionId, raw: &[u8]) -> bool {
    match protocol::decode(raw) {
        Ok(envelope) => supervisor.submit(conn, envelope).is_ok(),
        Err(e) => {
            warn!(%conn, "Dropping malformed message: {}", e);
            true
        }
    }
}
