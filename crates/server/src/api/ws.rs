//! WebSocket feed of queue events for displays and staff screens.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_MESSAGES_SENT};
use crate::state::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a single WebSocket connection.
///
/// The connection owns one hub subscription for its whole life. If the hub
/// drops it for falling behind, the socket is closed and the client is
/// expected to reconnect and refetch state.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.hub().register();
    let subscriber = subscription.id();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();
    info!(%subscriber, "WebSocket client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let json = match serde_json::to_string(event.as_ref()) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "Failed to serialize queue event");
                    continue;
                }
            };
            WS_MESSAGES_SENT
                .with_label_values(&[event.event_type()])
                .inc();
            if sender.send(Message::Text(json.into())).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                return;
            }
        }
        // The hub dropped this subscriber.
        warn!(%subscriber, "Subscriber dropped by hub, closing socket");
        let _ = sender.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            message = receiver.next() => match message {
                Some(Ok(Message::Close(_))) | None => {
                    debug!("WebSocket client requested close");
                    break;
                }
                Some(Ok(Message::Text(text))) => {
                    // Clients only listen; anything they send is ignored.
                    debug!(%subscriber, len = text.len(), "Ignoring client text message");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            },
        }
    }

    // Aborting drops the subscription, which unregisters it.
    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!(%subscriber, "WebSocket client disconnected");
}
