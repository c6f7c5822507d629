//! WebSocket handler for live session views
//!
//! A client attaches to one session with `GET /ws?session={id}`. It receives
//! a full snapshot on connect and again after every committed change, and
//! may submit mutations over the same socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::sessions::classify;
use super::AppState;
use crate::session::{Applied, Mutation, Session};

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Current session state
    #[serde(rename = "snapshot")]
    Snapshot { session: Box<Session> },
    /// Reply to a mutate request
    #[serde(rename = "outcome")]
    Outcome { applied: Applied },
    /// Error message
    #[serde(rename = "error")]
    Error { kind: String, message: String },
}

/// Messages sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Apply a mutation to the attached session
    #[serde(rename = "mutate")]
    Mutate { mutation: Mutation },
    /// Ping to keep connection alive
    #[serde(rename = "ping")]
    Ping,
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub session: String,
}

/// Handle WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.session))
}

async fn send(socket: &mut WebSocket, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode server message: {}", e);
            true
        }
    }
}

async fn snapshot(state: &AppState, session_id: &str) -> ServerMessage {
    match state.sessions.get(session_id).await {
        Ok(session) => ServerMessage::Snapshot {
            session: Box::new(session),
        },
        Err(e) => error_message(&e),
    }
}

fn error_message(err: &crate::session::SessionError) -> ServerMessage {
    ServerMessage::Error {
        kind: classify(err).1.to_string(),
        message: err.to_string(),
    }
}

/// Handle an individual WebSocket connection
async fn handle_socket(mut socket: WebSocket, state: AppState, session_id: String) {
    // Subscribe before the first snapshot so no change slips between them
    let mut events = state.sessions.subscribe();

    let first = snapshot(&state, &session_id).await;
    let attached = matches!(first, ServerMessage::Snapshot { .. });
    if !send(&mut socket, &first).await || !attached {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    info!("WebSocket attached to session {}", session_id);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) if event.session_id != session_id => {}
                    Ok(event) => {
                        debug!("Session {} changed by {} (rev {})", session_id, event.op, event.revision);
                        if !send(&mut socket, &snapshot(&state, &session_id).await).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("WebSocket for {} lagged by {} events", session_id, skipped);
                        if !send(&mut socket, &snapshot(&state, &session_id).await).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => handle_client_message(&state, &session_id, msg).await,
                            Err(e) => Some(ServerMessage::Error {
                                kind: "bad_request".to_string(),
                                message: e.to_string(),
                            }),
                        };
                        if let Some(reply) = reply {
                            if !send(&mut socket, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket detached from session {}", session_id);
}

/// Handle a message from the client
async fn handle_client_message(
    state: &AppState,
    session_id: &str,
    msg: ClientMessage,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Mutate { mutation } => {
            let reply = match state.sessions.apply(session_id, mutation).await {
                Ok(applied) => ServerMessage::Outcome { applied },
                Err(e) => error_message(&e),
            };
            Some(reply)
        }
        ClientMessage::Ping => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type": "mutate", "mutation": {"op": "advance_turn"}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Mutate {
                mutation: Mutation::AdvanceTurn
            }
        ));

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_error_message_shape() {
        let msg = ServerMessage::Error {
            kind: "not_found".into(),
            message: "Session not found: x".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "not_found");
    }
}
