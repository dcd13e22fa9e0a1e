use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use crate::alerter::broadcast::AlertEvent;
use super::AppState;

/// `GET /ws`: stream `{channel, alert}` events as they are published
pub async fn alert_feed(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let events = state.service.subscribe();
    ws.on_upgrade(move |socket| stream_alerts(socket, events))
}

async fn stream_alerts(mut socket: WebSocket, mut events: Receiver<AlertEvent>) {
    tracing::debug!("Websocket client connected");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to encode alert event");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Websocket client lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!("Websocket client disconnected");
}
