use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::App;
use crate::domain::error_codes::ErrorCode;
use crate::http::auth::AuthUser;

use super::events::{ClientEvent, ServerEvent};
use super::fanout::{ConnId, Room};

/// Outbox depth per connection; overflow drops events (clients resync over
/// REST).
const OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Browsers cannot set headers on WebSocket upgrades, so the bearer
    /// token may arrive as a query parameter instead.
    pub token: Option<String>,
}

/// `GET /ws` — authenticated WebSocket endpoint.
pub async fn websocket_handler(
    State(app): State<Arc<App>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = query.token.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string)
    });

    let auth = token.and_then(|t| app.verifier.verify(&t).ok());
    match auth {
        Some(auth) => ws.on_upgrade(move |socket| handle_socket(app, auth, socket)),
        None => (
            axum::http::StatusCode::UNAUTHORIZED,
            "missing or invalid token",
        )
            .into_response(),
    }
}

async fn handle_socket(app: Arc<App>, auth: AuthUser, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<ServerEvent>>(OUTBOX_CAPACITY);
    let conn_id = app.bus.register(auth.user_id, tx);
    info!(user_id = %auth.user_id, %conn_id, "socket connected");

    // Greet the client before any pushed events can reach the outbox.
    if send_event(
        &mut sender,
        &ServerEvent::Connected {
            user_id: auth.user_id,
        },
    )
    .await
    .is_err()
    {
        app.bus.unregister(&conn_id);
        return;
    }

    // Outgoing half: drain the outbox onto the socket.
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if send_event(&mut sender, &event).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Incoming half: subscriptions, typing relays, pings.
    let recv_app = app.clone();
    let receive_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    handle_client_message(&recv_app, &auth, conn_id, text.as_str()).await;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_)) => {}
                Ok(Message::Close(_)) => break,
                Err(err) => {
                    debug!(%conn_id, error = %err, "socket read error");
                    break;
                }
            }
        }
    });

    // Either direction finishing tears the connection down. Unregistering
    // drops the outbox sender, which ends the send task in turn.
    tokio::select! {
        _ = send_task => {}
        _ = receive_task => {}
    }
    app.bus.unregister(&conn_id);
    info!(user_id = %auth.user_id, %conn_id, "socket disconnected");
}

/// Serialize and push one event onto the write half.
async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(err) => {
            warn!(error = %err, "failed to serialize server event");
            Ok(())
        }
    }
}

async fn handle_client_message(app: &Arc<App>, auth: &AuthUser, conn_id: ConnId, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(err) => {
            app.bus.emit_conn(
                &conn_id,
                &Arc::new(ServerEvent::Error {
                    message: format!("unrecognized message: {err}"),
                    error_code: Some(ErrorCode::ValidationError),
                }),
            );
            return;
        }
    };

    match event {
        ClientEvent::MatchmakingSubscribe { request_id } => {
            // Authenticated join: only the request owner may listen in.
            let owned = app
                .storage
                .get_match_request(&request_id)
                .await
                .ok()
                .flatten()
                .is_some_and(|r| r.user_id == auth.user_id);
            if owned {
                app.bus.join(conn_id, Room::MatchRequest(request_id));
                debug!(%conn_id, %request_id, "subscribed to match request");
            } else {
                deny(app, conn_id, "match request not found");
            }
        }
        ClientEvent::MatchmakingUnsubscribe => {
            app.bus.leave_match_rooms(&conn_id);
        }
        ClientEvent::LobbySubscribe { lobby_id } => {
            let member = app
                .storage
                .get_lobby(&lobby_id)
                .await
                .ok()
                .flatten()
                .is_some_and(|l| l.was_member(&auth.user_id));
            if member {
                app.bus.join(conn_id, Room::Lobby(lobby_id));
                debug!(%conn_id, %lobby_id, "subscribed to lobby");
            } else {
                deny(app, conn_id, "lobby not found");
            }
        }
        ClientEvent::LobbyUnsubscribe { lobby_id } => {
            app.bus.leave(&conn_id, &Room::Lobby(lobby_id));
        }
        ClientEvent::ChatTyping { lobby_id } => {
            if let Err(err) = app.chat.typing(&lobby_id, auth.user_id).await {
                debug!(%conn_id, %lobby_id, error = %err, "typing relay refused");
            }
        }
        ClientEvent::Ping => {
            app.bus.emit_conn(&conn_id, &Arc::new(ServerEvent::Pong));
        }
    }
}

fn deny(app: &Arc<App>, conn_id: ConnId, message: &str) {
    app.bus.emit_conn(
        &conn_id,
        &Arc::new(ServerEvent::Error {
            message: message.to_string(),
            error_code: Some(ErrorCode::NotFound),
        }),
    );
}
