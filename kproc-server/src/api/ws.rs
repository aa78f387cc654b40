//! WebSocket progress streaming
//!
//! Bridges one progress-bus subscription to each connected socket. On
//! connect the client watches everything; a `{"subscribe": {"file_id":
//! ...}}` frame narrows the filter, `{"unsubscribe": true}` ends the
//! session with a close frame. Client disconnects tear the subscription
//! down so the bus never accumulates dead subscribers.

use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use kproc_common::FileId;
use serde::Deserialize;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct SubscribeFrame {
    file_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientFrame {
    subscribe: Option<SubscribeFrame>,
    unsubscribe: Option<bool>,
}

/// Parsed client command
#[derive(Debug, PartialEq)]
enum ClientCommand {
    /// Re-subscribe with the given filter (None watches everything)
    Subscribe(Option<FileId>),
    Unsubscribe,
    /// Unparseable or empty frame; ignored
    Ignore,
}

fn parse_client_frame(raw: &str) -> ClientCommand {
    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(_) => return ClientCommand::Ignore,
    };
    if frame.unsubscribe == Some(true) {
        return ClientCommand::Unsubscribe;
    }
    if let Some(subscribe) = frame.subscribe {
        return match subscribe.file_id {
            None => ClientCommand::Subscribe(None),
            Some(raw_id) => match FileId::parse(&raw_id) {
                Some(id) => ClientCommand::Subscribe(Some(id)),
                None => {
                    warn!(file_id = %raw_id, "Subscribe frame with invalid file_id ignored");
                    ClientCommand::Ignore
                }
            },
        };
    }
    ClientCommand::Ignore
}

/// GET /ws/progress
pub async fn progress_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    use futures::{SinkExt, StreamExt};

    info!("Progress WebSocket client connected");
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.bus.subscribe(None);

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(raw))) => match parse_client_frame(&raw) {
                        ClientCommand::Subscribe(filter) => {
                            debug!(filter = ?filter, "Progress subscription updated");
                            subscription.close();
                            subscription = state.bus.subscribe(filter);
                        }
                        ClientCommand::Unsubscribe => {
                            debug!("Client unsubscribed");
                            let _ = sender.send(Message::Close(None)).await;
                            break;
                        }
                        ClientCommand::Ignore => {}
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Ping/pong are answered by the protocol layer;
                        // binary frames are not part of this protocol.
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
            event = subscription.recv() => {
                match event {
                    Some(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize progress event");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Bus shut down; tell the client and end cleanly.
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    subscription.close();
    info!("Progress WebSocket client disconnected");
}

pub fn ws_routes() -> Router<AppState> {
    Router::new().route("/ws/progress", get(progress_socket))
}
