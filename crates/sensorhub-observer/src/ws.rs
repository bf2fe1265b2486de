//! `WebSocket` handler for live reading delivery.
//!
//! Clients connect to `GET /ws`. Each connection becomes one subscriber in
//! the shared registry and receives every broadcast reading as a JSON text
//! frame, in publish order.
//!
//! The connection ends when the client closes, a socket error occurs, or
//! the aggregation loop drops the subscriber after a failed delivery (its
//! channel closes). The subscriber is deregistered on every exit path.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use sensorhub_core::Subscriber;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` connection and register it as a
/// subscriber.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_subscribe(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Handle the `WebSocket` lifecycle: register, forward messages until
/// either side goes away, then deregister.
async fn handle_ws(mut socket: WebSocket, state: AppState) {
    let (subscriber, mut rx) = Subscriber::channel(state.subscriber_buffer);
    let id = subscriber.id();

    if let Err(e) = state.registry.add(subscriber).await {
        warn!(subscriber = %id, error = %e, "Rejecting WebSocket client");
        let frame = CloseFrame {
            code: close_code::AGAIN,
            reason: e.to_string().into(),
        };
        // The client may already be gone; nothing to do if so.
        let _ = socket.send(Message::Close(Some(frame))).await;
        return;
    }
    info!(subscriber = %id, "WebSocket client connected");

    loop {
        tokio::select! {
            // Next reading from the aggregation loop.
            message = rx.recv() => {
                let Some(json) = message else {
                    debug!(subscriber = %id, "Subscriber dropped by registry, closing");
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                if socket.send(Message::Text(json.to_string().into())).await.is_err() {
                    debug!(subscriber = %id, "WebSocket client disconnected (send failed)");
                    break;
                }
            }
            // Client frames: close, ping, or noise.
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(subscriber = %id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(subscriber = %id, "WebSocket client disconnected (pong failed)");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(subscriber = %id, "WebSocket error: {e}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.registry.remove(id).await;
    info!(subscriber = %id, "WebSocket client deregistered");
}
