//! WebSocket bridge.
//!
//! JSON text frames carry `join` and `send_message` events inbound; session
//! room events (processing status, new messages, session creation, errors)
//! flow outbound. A connection authenticates from a `?token=` query
//! parameter or from the token carried by its first `send_message`.

use std::collections::HashMap;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    AppState,
    auth::AuthenticatedUser,
    coordinator::{PostMessage, parse_session_id},
    delivery::EventPayload,
    error::ApiError,
};

const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientEvent {
    Join {
        session_id: Value,
    },
    SendMessage {
        #[serde(default)]
        session_id: Option<Value>,
        message: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        attached_file_ids: Vec<i64>,
        #[serde(default)]
        use_consensus: Option<bool>,
        #[serde(default)]
        selected_models: Vec<String>,
        #[serde(default)]
        user_name: Option<String>,
    },
}

/// HTTP handler for GET /ws.
pub(crate) async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user = query.token.as_deref().and_then(|token| state.auth.verify(token).ok());

    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

struct Connection {
    state: AppState,
    user: Option<AuthenticatedUser>,
    joined: HashMap<i64, JoinHandle<()>>,
    out_tx: mpsc::Sender<String>,
}

pub(crate) async fn handle_socket(mut socket: WebSocket, state: AppState, user: Option<AuthenticatedUser>) {
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let mut connection = Connection {
        state,
        user,
        joined: HashMap::new(),
        out_tx,
    };

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => connection.handle_text(text.as_str()).await,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary frames ignored
                    Some(Err(e)) => {
                        log::debug!("websocket receive error: {e}");
                        break;
                    }
                }
            }
            outbound = out_rx.recv() => {
                let Some(json) = outbound else { break };

                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    for (_, forwarder) in connection.joined.drain() {
        forwarder.abort();
    }
}

impl Connection {
    async fn handle_text(&mut self, text: &str) {
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                log::debug!("invalid client event: {e}");
                self.send_error(None, "argument_invalid", &format!("invalid event JSON: {e}"))
                    .await;
                return;
            }
        };

        match event {
            ClientEvent::Join { session_id } => self.handle_join(session_id).await,
            ClientEvent::SendMessage {
                session_id,
                message,
                token,
                attached_file_ids,
                use_consensus,
                selected_models,
                user_name,
            } => {
                self.handle_send_message(
                    session_id,
                    message,
                    token,
                    attached_file_ids,
                    use_consensus,
                    selected_models,
                    user_name,
                )
                .await;
            }
        }
    }

    async fn handle_join(&mut self, raw_session_id: Value) {
        let session_id = match parse_session_id(Some(&raw_session_id)) {
            Ok(Some(id)) => id,
            Ok(None) => {
                self.send_error(None, "invalid_session_id", "join requires a session id").await;
                return;
            }
            Err(error) => {
                self.send_api_error(None, &error).await;
                return;
            }
        };

        let Some(user) = self.user.clone() else {
            self.send_error(Some(session_id), "unauthorized", "authenticate before joining a session")
                .await;
            return;
        };

        match self.state.repository.session(session_id).await {
            Ok(Some(session)) if session.user_id == user.user_id => {}
            Ok(Some(_)) => {
                self.send_error(Some(session_id), "forbidden", "session belongs to another user")
                    .await;
                return;
            }
            Ok(None) => {
                self.send_error(Some(session_id), "not_found", "no such session").await;
                return;
            }
            Err(e) => {
                log::error!("session lookup failed: {e}");
                self.send_error(Some(session_id), "internal_error", "session lookup failed")
                    .await;
                return;
            }
        }

        self.join_room(session_id);
        log::debug!("client joined session {session_id}");
    }

    fn join_room(&mut self, session_id: i64) {
        if self.joined.contains_key(&session_id) {
            return;
        }

        let mut receiver = self.state.delivery.subscribe(session_id);
        let out_tx = self.out_tx.clone();

        let forwarder = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let Ok(json) = serde_json::to_string(&event) else {
                            continue;
                        };

                        if out_tx.send(json).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("subscriber lagged, skipped {skipped} events for session {session_id}");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.joined.insert(session_id, forwarder);
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_send_message(
        &mut self,
        raw_session_id: Option<Value>,
        message: String,
        token: Option<String>,
        attached_file_ids: Vec<i64>,
        use_consensus: Option<bool>,
        mut selected_models: Vec<String>,
        user_name: Option<String>,
    ) {
        if let Some(token) = token.as_deref() {
            match self.state.auth.verify(token) {
                Ok(user) => self.user = Some(user),
                Err(error) => {
                    self.send_api_error(None, &error).await;
                    return;
                }
            }
        }

        let Some(user) = self.user.clone() else {
            self.send_error(None, "unauthorized", "send_message requires a token").await;
            return;
        };

        let session_id = match parse_session_id(raw_session_id.as_ref()) {
            Ok(id) => id,
            Err(error) => {
                // Nothing is persisted for a malformed session id.
                self.send_api_error(None, &error).await;
                return;
            }
        };

        if use_consensus == Some(false) && selected_models.len() > 1 {
            selected_models.truncate(1);
        }

        let ack = self
            .state
            .coordinator
            .post_user_message(PostMessage {
                user_id: user.user_id,
                session_id,
                text: message,
                attached_file_ids,
                selected_models,
                user_name,
            })
            .await;

        match ack {
            Ok(ack) => {
                // Deliver this turn's events even when the session was just
                // created or never explicitly joined.
                self.join_room(ack.session_id);
            }
            Err(error) => {
                self.send_api_error(session_id, &error).await;
            }
        }
    }

    async fn send_api_error(&self, session_id: impl Into<Option<i64>>, error: &ApiError) {
        self.send_error(session_id.into(), error.kind(), error.message()).await;
    }

    async fn send_error(&self, session_id: Option<i64>, kind: &str, message: &str) {
        let payload = EventPayload::Error {
            session_id,
            kind: kind.to_string(),
            message: message.to_string(),
        };

        if let Ok(json) = serde_json::to_string(&payload) {
            let _ = self.out_tx.send(json).await;
        }
    }
}
