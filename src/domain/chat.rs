use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{LobbyId, UserId};

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "userId", rename_all = "snake_case")]
pub enum MessageSender {
    User(UserId),
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    System,
    Image,
}

/// One append-only message. Ids are per-channel and strictly increasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: u64,
    pub sender: MessageSender,
    pub content_type: ContentType,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A lobby's chat channel. 1:1 with the lobby; participants accumulate and
/// never shrink, so past members retain read access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatChannel {
    pub id: Uuid,
    pub lobby_id: LobbyId,
    pub participants: Vec<UserId>,
    pub messages: Vec<ChatMessage>,
    pub next_message_id: u64,
    pub created_at: DateTime<Utc>,
}

impl ChatChannel {
    pub fn new(lobby_id: LobbyId, participants: Vec<UserId>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            lobby_id,
            participants,
            messages: Vec::new(),
            next_message_id: 1,
            created_at: now,
        }
    }

    pub fn is_participant(&self, user_id: &UserId) -> bool {
        self.participants.contains(user_id)
    }

    pub fn add_participant(&mut self, user_id: UserId) {
        if !self.participants.contains(&user_id) {
            self.participants.push(user_id);
        }
    }

    /// Append a message, assigning the next id.
    pub fn append(
        &mut self,
        sender: MessageSender,
        content_type: ContentType,
        content: String,
        now: DateTime<Utc>,
    ) -> ChatMessage {
        let message = ChatMessage {
            id: self.next_message_id,
            sender,
            content_type,
            content,
            created_at: now,
        };
        self.next_message_id += 1;
        self.messages.push(message.clone());
        message
    }

    /// Page backwards through history: the newest `limit` messages older than
    /// `before` (when given), returned in ascending id order.
    pub fn page(&self, limit: usize, before: Option<DateTime<Utc>>) -> ChatHistoryPage {
        let eligible: Vec<&ChatMessage> = self
            .messages
            .iter()
            .filter(|m| before.is_none_or(|cutoff| m.created_at < cutoff))
            .collect();
        let skip = eligible.len().saturating_sub(limit);
        ChatHistoryPage {
            chat_id: self.id,
            messages: eligible[skip..].iter().map(|m| (*m).clone()).collect(),
            has_more: skip > 0,
        }
    }
}

/// One page of chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryPage {
    pub chat_id: Uuid,
    pub messages: Vec<ChatMessage>,
    pub has_more: bool,
}
