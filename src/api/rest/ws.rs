use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio::time::{interval, Duration};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::hub::Topic;
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Frames a client may send. Everything else on the socket is ignored.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe { order_id: Uuid },
    SendMessage { body: serde_json::Value },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identity: Identity) {
    let (mut sender, mut receiver) = socket.split();
    let (connection_id, rx) = state.hub.connect(identity);
    state.metrics.hub_connections.inc();

    info!(%connection_id, user_id = %identity.id, "websocket client connected");

    let mut events = UnboundedReceiverStream::new(rx);
    let send_task = tokio::spawn(async move {
        let mut heartbeat = interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                maybe_event = events.next() => {
                    let Some(event) = maybe_event else { break };
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(err) => {
                            warn!(error = %err, "failed to serialize hub event for ws");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                // A failed ping is how dead peers get noticed and reaped.
                _ = heartbeat.tick() => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_state = state.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let Message::Text(text) = message else { continue };

            match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Subscribe { order_id }) => {
                    recv_state.hub.subscribe(connection_id, Topic::Order(order_id));
                }
                Ok(ClientFrame::SendMessage { body }) => {
                    recv_state.hub.publish_chat(connection_id, body);
                }
                Err(err) => {
                    warn!(%connection_id, error = %err, "ignoring malformed client frame");
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.hub.disconnect(connection_id);
    state.metrics.hub_connections.dec();
    info!(%connection_id, "websocket client disconnected");
}
