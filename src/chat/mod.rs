//! Per-lobby chat.
//!
//! One append-only channel per lobby. Posting requires current active
//! membership; reading history only requires having ever held a slot, so
//! players who left can still scroll back.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::error;

use crate::domain::chat::{ChatHistoryPage, ChatMessage, ContentType, MessageSender};
use crate::domain::error_codes::ErrorCode;
use crate::domain::types::{LobbyId, UserId, MAX_CHAT_HISTORY_LIMIT, MAX_CHAT_MESSAGE_BYTES};
use crate::socket::{EventBus, Room, ServerEvent};
use crate::storage::Storage;

/// Default page size when the client does not pass a limit.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat channel not found")]
    NotFound,
    #[error("sender is not an active member of the lobby")]
    NotMember,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ChatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound => ErrorCode::NotFound,
            Self::NotMember => ErrorCode::Forbidden,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Storage(_) => ErrorCode::InternalServerError,
        }
    }
}

pub struct ChatService {
    storage: Arc<dyn Storage>,
    bus: Arc<EventBus>,
    /// Serializes append+publish per channel so the room observes messages
    /// in id order.
    locks: DashMap<LobbyId, Arc<Mutex<()>>>,
}

impl ChatService {
    pub fn new(storage: Arc<dyn Storage>, bus: Arc<EventBus>) -> Self {
        Self {
            storage,
            bus,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, lobby_id: &LobbyId) -> Arc<Mutex<()>> {
        self.locks
            .entry(*lobby_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Post a user message into a lobby's channel.
    pub async fn post(
        &self,
        lobby_id: &LobbyId,
        sender_id: UserId,
        content: &str,
        content_type: ContentType,
    ) -> Result<ChatMessage, ChatError> {
        if content_type == ContentType::System {
            return Err(ChatError::Validation(
                "system messages cannot be posted by users".into(),
            ));
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::Validation("message must not be empty".into()));
        }
        if content.len() > MAX_CHAT_MESSAGE_BYTES {
            return Err(ChatError::Validation(format!(
                "message exceeds {MAX_CHAT_MESSAGE_BYTES} bytes"
            )));
        }

        let lobby = self
            .storage
            .get_lobby(lobby_id)
            .await?
            .ok_or(ChatError::NotFound)?;
        if !lobby.is_member_active(&sender_id) {
            return Err(ChatError::NotMember);
        }

        let lock = self.lock_for(lobby_id);
        let _guard = lock.lock().await;
        let message = self
            .storage
            .append_chat_message(
                lobby_id,
                MessageSender::User(sender_id),
                content_type,
                content.to_string(),
                Utc::now(),
            )
            .await?
            .ok_or(ChatError::NotFound)?;

        self.publish(lobby_id, &message);
        Ok(message)
    }

    /// Read back history. Requires the caller to have ever been a member;
    /// outsiders get `NotFound` rather than confirmation the chat exists.
    pub async fn history(
        &self,
        lobby_id: &LobbyId,
        user_id: &UserId,
        limit: Option<usize>,
        before: Option<DateTime<Utc>>,
    ) -> Result<ChatHistoryPage, ChatError> {
        let channel = self
            .storage
            .channel_for_lobby(lobby_id)
            .await?
            .ok_or(ChatError::NotFound)?;
        if !channel.is_participant(user_id) {
            return Err(ChatError::NotFound);
        }
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_CHAT_HISTORY_LIMIT);
        Ok(channel.page(limit, before))
    }

    /// Server-generated message (state transitions, host changes). Failures
    /// are logged, never propagated: chat trouble must not abort a lobby
    /// mutation.
    pub async fn system_post(&self, lobby_id: &LobbyId, text: &str) {
        let lock = self.lock_for(lobby_id);
        let _guard = lock.lock().await;
        match self
            .storage
            .append_chat_message(
                lobby_id,
                MessageSender::System,
                ContentType::System,
                text.to_string(),
                Utc::now(),
            )
            .await
        {
            Ok(Some(message)) => self.publish(lobby_id, &message),
            Ok(None) => {
                error!(%lobby_id, "system chat post against missing channel");
            }
            Err(err) => {
                error!(%lobby_id, error = %err, "failed to append system chat message");
            }
        }
    }

    /// Transient typing indicator; relayed, never persisted.
    pub async fn typing(&self, lobby_id: &LobbyId, user_id: UserId) -> Result<(), ChatError> {
        let lobby = self
            .storage
            .get_lobby(lobby_id)
            .await?
            .ok_or(ChatError::NotFound)?;
        if !lobby.is_member_active(&user_id) {
            return Err(ChatError::NotMember);
        }
        self.bus.emit_room(
            &Room::Lobby(*lobby_id),
            &Arc::new(ServerEvent::ChatTyping {
                lobby_id: *lobby_id,
                user_id,
            }),
        );
        Ok(())
    }

    fn publish(&self, lobby_id: &LobbyId, message: &ChatMessage) {
        self.bus.emit_room(
            &Room::Lobby(*lobby_id),
            &Arc::new(ServerEvent::ChatMessage {
                lobby_id: *lobby_id,
                message: message.clone(),
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chat::ChatChannel;
    use crate::domain::criteria::{GameMode, Region};
    use crate::domain::lobby::{Lobby, LobbyCapacity};
    use crate::storage::MemoryStorage;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    async fn setup() -> (ChatService, Arc<MemoryStorage>, Arc<EventBus>, Lobby) {
        let storage = Arc::new(MemoryStorage::new());
        let bus = Arc::new(EventBus::new());
        let members = vec![Uuid::new_v4(), Uuid::new_v4()];
        let lobby = Lobby::for_match(
            "rocket-rumble".into(),
            GameMode::Casual,
            Region::Na,
            members[0],
            &members,
            LobbyCapacity { min: 2, max: 2 },
            Utc::now(),
        );
        storage.insert_lobby(lobby.clone()).await.unwrap();
        storage
            .insert_channel(ChatChannel::new(lobby.id, members.clone(), Utc::now()))
            .await
            .unwrap();
        let svc = ChatService::new(storage.clone(), bus.clone());
        (svc, storage, bus, lobby)
    }

    #[tokio::test]
    async fn member_posts_and_room_receives() {
        let (svc, _storage, bus, lobby) = setup().await;
        let member = lobby.members[0].user_id;

        let (tx, mut rx) = mpsc::channel(8);
        let conn = bus.register(member, tx);
        bus.join(conn, Room::Lobby(lobby.id));

        let message = svc
            .post(&lobby.id, member, "  hello there  ", ContentType::Text)
            .await
            .unwrap();
        assert_eq!(message.id, 1);
        assert_eq!(message.content, "hello there");

        let event = rx.try_recv().expect("chat:message expected");
        assert!(matches!(&*event, ServerEvent::ChatMessage { .. }));
    }

    #[tokio::test]
    async fn message_ids_increase_across_posts() {
        let (svc, _storage, _bus, lobby) = setup().await;
        let member = lobby.members[0].user_id;
        let first = svc
            .post(&lobby.id, member, "one", ContentType::Text)
            .await
            .unwrap();
        let second = svc
            .post(&lobby.id, member, "two", ContentType::Text)
            .await
            .unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn non_member_cannot_post() {
        let (svc, _storage, _bus, lobby) = setup().await;
        let outsider = Uuid::new_v4();
        assert!(matches!(
            svc.post(&lobby.id, outsider, "hi", ContentType::Text).await,
            Err(ChatError::NotMember)
        ));
    }

    #[tokio::test]
    async fn rejects_empty_oversized_and_system_posts() {
        let (svc, _storage, _bus, lobby) = setup().await;
        let member = lobby.members[0].user_id;

        assert!(matches!(
            svc.post(&lobby.id, member, "   ", ContentType::Text).await,
            Err(ChatError::Validation(_))
        ));
        let oversized = "x".repeat(MAX_CHAT_MESSAGE_BYTES + 1);
        assert!(matches!(
            svc.post(&lobby.id, member, &oversized, ContentType::Text).await,
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            svc.post(&lobby.id, member, "hi", ContentType::System).await,
            Err(ChatError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn past_member_reads_history_but_outsider_does_not() {
        let (svc, storage, _bus, lobby) = setup().await;
        let member = lobby.members[1].user_id;
        svc.post(&lobby.id, member, "before leaving", ContentType::Text)
            .await
            .unwrap();

        // The member leaves; participant status in the channel remains.
        let mut updated = storage.get_lobby(&lobby.id).await.unwrap().unwrap();
        updated.leave(&member, Utc::now()).unwrap();
        storage.save_lobby(updated).await.unwrap();

        let page = svc.history(&lobby.id, &member, None, None).await.unwrap();
        assert_eq!(page.messages.len(), 1);

        let outsider = Uuid::new_v4();
        assert!(matches!(
            svc.history(&lobby.id, &outsider, None, None).await,
            Err(ChatError::NotFound)
        ));
    }

    #[tokio::test]
    async fn history_limit_is_clamped() {
        let (svc, _storage, _bus, lobby) = setup().await;
        let member = lobby.members[0].user_id;
        for i in 0..5 {
            svc.post(&lobby.id, member, &format!("m{i}"), ContentType::Text)
                .await
                .unwrap();
        }
        let page = svc
            .history(&lobby.id, &member, Some(10_000), None)
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 5);

        let one = svc.history(&lobby.id, &member, Some(1), None).await.unwrap();
        assert_eq!(one.messages.len(), 1);
        assert_eq!(one.messages[0].content, "m4");
        assert!(one.has_more);
    }

    #[tokio::test]
    async fn system_post_lands_in_channel() {
        let (svc, storage, _bus, lobby) = setup().await;
        svc.system_post(&lobby.id, "All players ready!").await;
        let channel = storage.channel_for_lobby(&lobby.id).await.unwrap().unwrap();
        assert_eq!(channel.messages.len(), 1);
        assert_eq!(channel.messages[0].sender, MessageSender::System);
        assert_eq!(channel.messages[0].content_type, ContentType::System);
    }

    #[tokio::test]
    async fn typing_requires_active_membership() {
        let (svc, _storage, bus, lobby) = setup().await;
        let member = lobby.members[0].user_id;
        let (tx, mut rx) = mpsc::channel(8);
        let conn = bus.register(member, tx);
        bus.join(conn, Room::Lobby(lobby.id));

        svc.typing(&lobby.id, member).await.unwrap();
        assert!(matches!(
            &*rx.try_recv().unwrap(),
            ServerEvent::ChatTyping { .. }
        ));

        assert!(matches!(
            svc.typing(&lobby.id, Uuid::new_v4()).await,
            Err(ChatError::NotMember)
        ));
    }
}
