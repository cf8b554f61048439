//! Minimal WebSocket fan-out of [`MempoolUpdate`] (spec.md §6
//! supplemented surface). Grounded on `rust-backend/src/main.rs`'s
//! `websocket_handler`/`handle_socket`/`websocket_broadcaster` trio,
//! adapted from its `broadcast` receiver to a `watch` receiver since
//! there is only ever one logical "latest" update to forward.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tracing::debug;

use super::AppState;

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut updates = state.updates;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    debug!("update channel closed, ending websocket session");
                    break;
                }
                let update = updates.borrow().clone();
                let payload = match serde_json::to_string(&update) {
                    Ok(json) => json,
                    Err(e) => {
                        debug!(error = %e, "failed to serialize update");
                        continue;
                    }
                };
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
