use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use easel_events::Topic;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::state::AppState;

/// A frame sent by the client to manage its topic subscriptions.
///
/// ```json
/// {"action": "subscribe", "topics": ["queue", "downloads"]}
/// {"action": "unsubscribe"}
/// ```
#[derive(Debug, Deserialize)]
struct ClientFrame {
    action: String,
    #[serde(default)]
    topics: Vec<Topic>,
}

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Manage a single WebSocket connection after upgrade.
///
/// The connection owns an event-bus subscription (initially empty) plus a
/// control-frame channel registered with `WsManager`; one select loop
/// multiplexes bus events, control frames, and inbound client frames.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let mut subscription = state.event_bus.subscribe(&[]);
    let subscription_id = subscription.id;
    let mut control_rx = state.ws_manager.add(conn_id.clone()).await;

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            // Control frames from the manager (heartbeat pings, shutdown).
            control = control_rx.recv() => {
                let Some(message) = control else { break };
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }

            // Events matching this connection's topics.
            event = subscription.rx.recv() => {
                let Some(event) = event else { break };
                let payload = serde_json::json!({
                    "topic": event.topic,
                    "type": event.event_type,
                    "payload": event.payload,
                    "timestamp": event.timestamp,
                });
                if sink.send(Message::Text(payload.to_string().into())).await.is_err() {
                    break;
                }
            }

            // Frames from the client.
            inbound = stream.next() => {
                match inbound {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(text))) => {
                        if let Some(ack) = handle_client_frame(&state, subscription_id, &text) {
                            if sink.send(Message::Text(ack.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        tracing::trace!(conn_id = %conn_id, "pong received");
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.event_bus.unsubscribe(subscription_id);
    state.ws_manager.remove(&conn_id).await;
    tracing::info!(conn_id = %conn_id, dropped = subscription.dropped(), "WebSocket disconnected");
}

/// Apply a client frame; returns an acknowledgement to send back, if any.
fn handle_client_frame(
    state: &AppState,
    subscription_id: uuid::Uuid,
    raw: &str,
) -> Option<String> {
    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            return Some(
                serde_json::json!({"type": "error", "error": format!("bad frame: {e}")})
                    .to_string(),
            );
        }
    };

    match frame.action.as_str() {
        "subscribe" => {
            state.event_bus.set_topics(subscription_id, &frame.topics);
            Some(
                serde_json::json!({"type": "subscribed", "topics": frame.topics}).to_string(),
            )
        }
        "unsubscribe" => {
            state.event_bus.set_topics(subscription_id, &[]);
            Some(serde_json::json!({"type": "subscribed", "topics": []}).to_string())
        }
        other => Some(
            serde_json::json!({"type": "error", "error": format!("unknown action '{other}'")})
                .to_string(),
        ),
    }
}
