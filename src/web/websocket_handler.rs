use axum::{
    extract::{
        State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::stream::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::web::AppState;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(mut socket: WebSocket, app_state: Arc<AppState>) {
    let mut rx = app_state.broadcaster.subscribe();
    debug!("WebSocket subscriber connected.");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        if socket.send(Message::Text(Utf8Bytes::from(json))).await.is_err() {
                            // Client went away; it will reconcile on reconnect.
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize event for WebSocket push.");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Missed events are gone for good; the client must fetch
                    // the full state to resynchronize.
                    warn!(skipped, "WebSocket subscriber lagged; events dropped.");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // pings and client chatter are ignored
                Some(Err(_)) => break,
            },
        }
    }

    debug!("WebSocket subscriber disconnected.");
}
