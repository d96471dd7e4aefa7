use serde::{Deserialize, Serialize};

use crate::domain::chat::ChatMessage;
use crate::domain::error_codes::ErrorCode;
use crate::domain::lobby::LobbySnapshot;
use crate::domain::notification::Notification;
use crate::domain::request::RequestStatus;
use crate::domain::types::{LobbyId, RequestId, UserId};

/// Messages clients send over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Join the `matchrequest:<id>` room for an owned request.
    #[serde(rename = "matchmaking:subscribe")]
    MatchmakingSubscribe { request_id: RequestId },
    /// Leave all matchrequest rooms.
    #[serde(rename = "matchmaking:unsubscribe")]
    MatchmakingUnsubscribe,
    /// Join the `lobby:<id>` room for a lobby the user belongs to.
    #[serde(rename = "lobby:subscribe")]
    LobbySubscribe { lobby_id: LobbyId },
    #[serde(rename = "lobby:unsubscribe")]
    LobbyUnsubscribe { lobby_id: LobbyId },
    /// Transient typing indicator, relayed to the lobby room.
    #[serde(rename = "chat:typing")]
    ChatTyping { lobby_id: LobbyId },
    #[serde(rename = "ping")]
    Ping,
}

/// Messages the server pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Connection accepted and bound to the authenticated user.
    #[serde(rename = "connected")]
    Connected { user_id: UserId },
    /// Matchmaking progress for one request. Terminal states are final for
    /// the room.
    #[serde(rename = "matchmaking:status")]
    MatchmakingStatus {
        request_id: RequestId,
        state: RequestStatus,
        /// Seconds searched so far.
        #[serde(skip_serializing_if = "Option::is_none")]
        search_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        relaxation_level: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        potential_matches: Option<usize>,
        /// Estimated seconds until a match.
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lobby_id: Option<LobbyId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        participants: Option<Vec<UserId>>,
    },
    #[serde(rename = "lobby:created")]
    LobbyCreated { lobby_id: LobbyId },
    /// Versioned snapshot; clients drop versions older than the last seen.
    #[serde(rename = "lobby:update")]
    LobbyUpdate { lobby: Box<LobbySnapshot> },
    #[serde(rename = "lobby:member:joined")]
    LobbyMemberJoined { lobby_id: LobbyId, user_id: UserId },
    #[serde(rename = "lobby:member:left")]
    LobbyMemberLeft {
        lobby_id: LobbyId,
        user_id: UserId,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_host: Option<UserId>,
    },
    #[serde(rename = "lobby:member:ready")]
    LobbyMemberReady {
        lobby_id: LobbyId,
        user_id: UserId,
        ready: bool,
    },
    #[serde(rename = "chat:message")]
    ChatMessage {
        lobby_id: LobbyId,
        message: ChatMessage,
    },
    #[serde(rename = "chat:typing")]
    ChatTyping { lobby_id: LobbyId, user_id: UserId },
    #[serde(rename = "notification:new")]
    NotificationNew { notification: Box<Notification> },
    #[serde(rename = "notification:count")]
    NotificationCount { unread: u64 },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
}
