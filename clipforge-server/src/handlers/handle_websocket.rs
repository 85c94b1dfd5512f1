use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use clipforge_core::StatusEvent;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::infra::app_state::AppState;

/// Push every record status event to the client as a JSON text frame.
pub async fn status_websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    // Subscribe before the upgrade completes so no event in between is lost.
    let events = state.notifier.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, events))
}

async fn handle_socket(socket: WebSocket, mut events: broadcast::Receiver<StatusEvent>) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(error = %err, "failed to encode status event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "status listener lagged; events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("status websocket closed");
}
