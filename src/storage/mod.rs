use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    chat::{ChatChannel, ChatMessage, ContentType, MessageSender},
    criteria::{GameMode, Region},
    lobby::Lobby,
    notification::{
        Channel, DeliveryState, Notification, NotificationPreferences, NotificationType, Priority,
        ReadStatus,
    },
    request::{MatchRequest, RequestStatus},
    types::{GameId, LobbyId, NotificationId, RequestId, UserId},
    user::User,
};

/// One row per formed match; backs the history endpoint, the admin stats
/// report, and the matched-wait estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub id: Uuid,
    pub game_id: GameId,
    pub game_mode: GameMode,
    pub region: Region,
    pub participants: Vec<UserId>,
    pub lobby_id: LobbyId,
    pub group_score: f64,
    /// Seconds each participant waited, in participant order.
    pub wait_seconds: Vec<f64>,
    pub formed_at: DateTime<Utc>,
}

/// Filters accepted by the notification listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationFilter {
    pub status: Option<ReadStatus>,
    pub kind: Option<NotificationType>,
    pub priority: Option<Priority>,
}

/// Storage abstraction for the matchmaking core.
///
/// The contract is intentionally narrow: exactly what the core needs to run
/// and to reconstruct state after a restart (the queue index is rebuilt from
/// `searching` requests). Compound request-state transitions are expressed as
/// atomic operations so the cancel/finalize race resolves inside one call.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the backing store.
    async fn initialize(&self) -> Result<()>;

    /// Health probe for the liveness endpoint.
    async fn health_check(&self) -> bool;

    // --- users -----------------------------------------------------------

    async fn upsert_user(&self, user: User) -> Result<()>;

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>>;

    /// Bulk fetch preserving input order; unknown ids are skipped.
    async fn get_users(&self, user_ids: &[UserId]) -> Result<Vec<User>>;

    async fn update_notification_preferences(
        &self,
        user_id: &UserId,
        preferences: NotificationPreferences,
    ) -> Result<bool>;

    // --- match requests --------------------------------------------------

    /// Persist a new searching request. Fails if the user already has one.
    async fn insert_match_request(&self, request: MatchRequest) -> Result<()>;

    async fn get_match_request(&self, request_id: &RequestId) -> Result<Option<MatchRequest>>;

    async fn active_request_for_user(&self, user_id: &UserId) -> Result<Option<MatchRequest>>;

    /// Every request still in `searching` (including not-yet-due scheduled
    /// ones). Startup reconstruction and tick reconciliation read this.
    async fn list_searching_requests(&self) -> Result<Vec<MatchRequest>>;

    /// Raise the relaxation level. Levels only move forward; returns false
    /// if the request is gone, terminal, or already at/above `level`.
    async fn advance_relaxation(&self, request_id: &RequestId, level: u8) -> Result<bool>;

    /// Atomically move a `searching` request to a terminal state. Returns
    /// `None` when the request was not in `searching` (lost race); the stored
    /// terminal state is then left untouched.
    async fn complete_match_request(
        &self,
        request_id: &RequestId,
        new_status: RequestStatus,
        matched_lobby: Option<LobbyId>,
        now: DateTime<Utc>,
    ) -> Result<Option<MatchRequest>>;

    /// Atomically flip a whole match worth of requests to `matched`. All or
    /// nothing: if any request is no longer `searching` (cancelled or
    /// expired mid-tick), nothing is written and `None` comes back with the
    /// terminal states preserved.
    async fn complete_match_requests(
        &self,
        request_ids: &[RequestId],
        matched_lobby: LobbyId,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<MatchRequest>>>;

    /// Page over a user's requests, newest first.
    async fn request_history(
        &self,
        user_id: &UserId,
        game_id: Option<&GameId>,
        status: Option<RequestStatus>,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<MatchRequest>, usize)>;

    // --- lobbies ---------------------------------------------------------

    async fn insert_lobby(&self, lobby: Lobby) -> Result<()>;

    async fn get_lobby(&self, lobby_id: &LobbyId) -> Result<Option<Lobby>>;

    /// Whole-record write. Callers serialize per-lobby mutations with the
    /// lobby service's aggregate lock.
    async fn save_lobby(&self, lobby: Lobby) -> Result<()>;

    /// Lobbies where the user holds (or held) a slot. With `history_cutoff`
    /// set, closed lobbies newer than the cutoff are included as well.
    async fn lobbies_for_user(
        &self,
        user_id: &UserId,
        history_cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<Lobby>>;

    // --- chat ------------------------------------------------------------

    async fn insert_channel(&self, channel: ChatChannel) -> Result<()>;

    async fn channel_for_lobby(&self, lobby_id: &LobbyId) -> Result<Option<ChatChannel>>;

    /// Append under the channel lock so message ids stay strictly
    /// increasing. Returns `None` when the lobby has no channel.
    async fn append_chat_message(
        &self,
        lobby_id: &LobbyId,
        sender: MessageSender,
        content_type: ContentType,
        content: String,
        now: DateTime<Utc>,
    ) -> Result<Option<ChatMessage>>;

    async fn add_chat_participant(&self, lobby_id: &LobbyId, user_id: UserId) -> Result<()>;

    // --- notifications ---------------------------------------------------

    async fn insert_notification(&self, notification: Notification) -> Result<()>;

    async fn get_notification(
        &self,
        user_id: &UserId,
        notification_id: &NotificationId,
    ) -> Result<Option<Notification>>;

    /// Page over a user's notifications, newest first.
    async fn list_notifications(
        &self,
        user_id: &UserId,
        filter: NotificationFilter,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<Notification>, usize)>;

    async fn unread_count(&self, user_id: &UserId) -> Result<u64>;

    /// Mark specific notifications read; returns how many records changed.
    async fn mark_notifications_read(
        &self,
        user_id: &UserId,
        ids: &[NotificationId],
    ) -> Result<u64>;

    async fn mark_all_notifications_read(&self, user_id: &UserId) -> Result<u64>;

    /// Delete one of the user's notifications.
    async fn delete_notification(
        &self,
        user_id: &UserId,
        notification_id: &NotificationId,
    ) -> Result<bool>;

    /// Delete read/archived notifications created before `cutoff`.
    async fn sweep_notifications(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Record per-channel delivery progress.
    async fn set_delivery_state(
        &self,
        notification_id: &NotificationId,
        channel: Channel,
        state: DeliveryState,
    ) -> Result<()>;

    // --- match records ---------------------------------------------------

    async fn insert_match_record(&self, record: MatchRecord) -> Result<()>;

    async fn match_records_since(&self, since: DateTime<Utc>) -> Result<Vec<MatchRecord>>;

    async fn match_records_for_user(&self, user_id: &UserId) -> Result<Vec<MatchRecord>>;
}

/// Storage configuration — in-memory only for matchpool-server.
#[derive(Debug, Clone, Default)]
pub enum StorageConfig {
    #[default]
    InMemory,
}

/// Create a storage instance based on configuration.
pub fn create_storage(config: &StorageConfig) -> Box<dyn Storage> {
    match config {
        StorageConfig::InMemory => Box::new(MemoryStorage::new()),
    }
}

/// Simple in-memory store for single-instance deployments and tests.
///
/// Lock ordering: each collection has its own lock and no operation takes
/// more than one collection's write lock, so there is no ordering hazard.
/// Request-state transitions are atomic under the `requests` write lock.
#[derive(Default)]
pub struct MemoryStorage {
    users: RwLock<HashMap<UserId, User>>,
    requests: RwLock<RequestTable>,
    lobbies: RwLock<HashMap<LobbyId, Lobby>>,
    /// Keyed by lobby id — chat channels are 1:1 with lobbies.
    channels: RwLock<HashMap<LobbyId, ChatChannel>>,
    notifications: RwLock<HashMap<NotificationId, Notification>>,
    match_records: RwLock<Vec<MatchRecord>>,
}

#[derive(Default)]
struct RequestTable {
    rows: HashMap<RequestId, MatchRequest>,
    /// user -> their current searching request, maintained on every write.
    active: HashMap<UserId, RequestId>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn upsert_user(&self, user: User) -> Result<()> {
        self.users.write().await.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn get_users(&self, user_ids: &[UserId]) -> Result<Vec<User>> {
        let users = self.users.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| users.get(id).cloned())
            .collect())
    }

    async fn update_notification_preferences(
        &self,
        user_id: &UserId,
        preferences: NotificationPreferences,
    ) -> Result<bool> {
        let mut users = self.users.write().await;
        match users.get_mut(user_id) {
            Some(user) => {
                user.notification_preferences = preferences;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_match_request(&self, request: MatchRequest) -> Result<()> {
        let mut table = self.requests.write().await;
        if let Some(existing_id) = table.active.get(&request.user_id) {
            // The index can hold a stale entry if a terminal write raced a
            // crash; re-check the actual row before rejecting.
            if table
                .rows
                .get(existing_id)
                .is_some_and(MatchRequest::is_searching)
            {
                anyhow::bail!(
                    "user {} already has an active match request {existing_id}",
                    request.user_id
                );
            }
        }
        table.active.insert(request.user_id, request.id);
        table.rows.insert(request.id, request);
        Ok(())
    }

    async fn get_match_request(&self, request_id: &RequestId) -> Result<Option<MatchRequest>> {
        Ok(self.requests.read().await.rows.get(request_id).cloned())
    }

    async fn active_request_for_user(&self, user_id: &UserId) -> Result<Option<MatchRequest>> {
        let table = self.requests.read().await;
        Ok(table
            .active
            .get(user_id)
            .and_then(|id| table.rows.get(id))
            .filter(|r| r.is_searching())
            .cloned())
    }

    async fn list_searching_requests(&self) -> Result<Vec<MatchRequest>> {
        let table = self.requests.read().await;
        let mut searching: Vec<MatchRequest> = table
            .rows
            .values()
            .filter(|r| r.is_searching())
            .cloned()
            .collect();
        searching.sort_by(|a, b| a.search_start_time.cmp(&b.search_start_time));
        Ok(searching)
    }

    async fn advance_relaxation(&self, request_id: &RequestId, level: u8) -> Result<bool> {
        let mut table = self.requests.write().await;
        match table.rows.get_mut(request_id) {
            Some(request) if request.is_searching() && request.relaxation_level < level => {
                request.relaxation_level = level.min(3);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_match_request(
        &self,
        request_id: &RequestId,
        new_status: RequestStatus,
        matched_lobby: Option<LobbyId>,
        now: DateTime<Utc>,
    ) -> Result<Option<MatchRequest>> {
        let mut table = self.requests.write().await;
        let Some(request) = table.rows.get_mut(request_id) else {
            return Ok(None);
        };
        if !request.is_searching() || !new_status.is_terminal() {
            return Ok(None);
        }
        request.status = new_status;
        request.completed_at = Some(now);
        request.matched_lobby = matched_lobby;
        let updated = request.clone();
        // Drop the active-index entry if it still points at this request.
        if table.active.get(&updated.user_id) == Some(request_id) {
            table.active.remove(&updated.user_id);
        }
        Ok(Some(updated))
    }

    async fn complete_match_requests(
        &self,
        request_ids: &[RequestId],
        matched_lobby: LobbyId,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<MatchRequest>>> {
        let mut table = self.requests.write().await;
        // Validate the whole set under the write lock before touching any
        // row: a cancel that won the lock beforehand aborts the match.
        if !request_ids
            .iter()
            .all(|id| table.rows.get(id).is_some_and(MatchRequest::is_searching))
        {
            return Ok(None);
        }
        let mut updated = Vec::with_capacity(request_ids.len());
        for id in request_ids {
            if let Some(request) = table.rows.get_mut(id) {
                request.status = RequestStatus::Matched;
                request.completed_at = Some(now);
                request.matched_lobby = Some(matched_lobby);
                updated.push(request.clone());
            }
        }
        for request in &updated {
            if table.active.get(&request.user_id) == Some(&request.id) {
                table.active.remove(&request.user_id);
            }
        }
        Ok(Some(updated))
    }

    async fn request_history(
        &self,
        user_id: &UserId,
        game_id: Option<&GameId>,
        status: Option<RequestStatus>,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<MatchRequest>, usize)> {
        let table = self.requests.read().await;
        let mut rows: Vec<MatchRequest> = table
            .rows
            .values()
            .filter(|r| &r.user_id == user_id)
            .filter(|r| {
                game_id.is_none_or(|g| r.criteria.games.iter().any(|sel| &sel.game_id == g))
            })
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = rows.len();
        let start = page.saturating_mul(limit).min(total);
        let end = start.saturating_add(limit).min(total);
        Ok((rows[start..end].to_vec(), total))
    }

    async fn insert_lobby(&self, lobby: Lobby) -> Result<()> {
        self.lobbies.write().await.insert(lobby.id, lobby);
        Ok(())
    }

    async fn get_lobby(&self, lobby_id: &LobbyId) -> Result<Option<Lobby>> {
        Ok(self.lobbies.read().await.get(lobby_id).cloned())
    }

    async fn save_lobby(&self, lobby: Lobby) -> Result<()> {
        let mut lobbies = self.lobbies.write().await;
        if !lobbies.contains_key(&lobby.id) {
            anyhow::bail!("lobby {} not found", lobby.id);
        }
        lobbies.insert(lobby.id, lobby);
        Ok(())
    }

    async fn lobbies_for_user(
        &self,
        user_id: &UserId,
        history_cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<Lobby>> {
        let lobbies = self.lobbies.read().await;
        let mut rows: Vec<Lobby> = lobbies
            .values()
            .filter(|lobby| lobby.was_member(user_id))
            .filter(|lobby| {
                if lobby.status != crate::domain::LobbyStatus::Closed {
                    return true;
                }
                match history_cutoff {
                    Some(cutoff) => lobby.closed_at.is_some_and(|closed| closed >= cutoff),
                    None => false,
                }
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.formed_at.cmp(&a.formed_at));
        Ok(rows)
    }

    async fn insert_channel(&self, channel: ChatChannel) -> Result<()> {
        self.channels
            .write()
            .await
            .insert(channel.lobby_id, channel);
        Ok(())
    }

    async fn channel_for_lobby(&self, lobby_id: &LobbyId) -> Result<Option<ChatChannel>> {
        Ok(self.channels.read().await.get(lobby_id).cloned())
    }

    async fn append_chat_message(
        &self,
        lobby_id: &LobbyId,
        sender: MessageSender,
        content_type: ContentType,
        content: String,
        now: DateTime<Utc>,
    ) -> Result<Option<ChatMessage>> {
        let mut channels = self.channels.write().await;
        Ok(channels
            .get_mut(lobby_id)
            .map(|channel| channel.append(sender, content_type, content, now)))
    }

    async fn add_chat_participant(&self, lobby_id: &LobbyId, user_id: UserId) -> Result<()> {
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get_mut(lobby_id) {
            channel.add_participant(user_id);
        }
        Ok(())
    }

    async fn insert_notification(&self, notification: Notification) -> Result<()> {
        self.notifications
            .write()
            .await
            .insert(notification.id, notification);
        Ok(())
    }

    async fn get_notification(
        &self,
        user_id: &UserId,
        notification_id: &NotificationId,
    ) -> Result<Option<Notification>> {
        Ok(self
            .notifications
            .read()
            .await
            .get(notification_id)
            .filter(|n| &n.user_id == user_id)
            .cloned())
    }

    async fn list_notifications(
        &self,
        user_id: &UserId,
        filter: NotificationFilter,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<Notification>, usize)> {
        let notifications = self.notifications.read().await;
        let mut rows: Vec<Notification> = notifications
            .values()
            .filter(|n| &n.user_id == user_id)
            .filter(|n| filter.status.is_none_or(|s| n.status == s))
            .filter(|n| filter.kind.is_none_or(|k| n.kind == k))
            .filter(|n| filter.priority.is_none_or(|p| n.priority == p))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = rows.len();
        let start = page.saturating_mul(limit).min(total);
        let end = start.saturating_add(limit).min(total);
        Ok((rows[start..end].to_vec(), total))
    }

    async fn unread_count(&self, user_id: &UserId) -> Result<u64> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .values()
            .filter(|n| &n.user_id == user_id && n.status == ReadStatus::Unread)
            .count() as u64)
    }

    async fn mark_notifications_read(
        &self,
        user_id: &UserId,
        ids: &[NotificationId],
    ) -> Result<u64> {
        let mut notifications = self.notifications.write().await;
        let mut modified = 0;
        for id in ids {
            if let Some(n) = notifications.get_mut(id) {
                if &n.user_id == user_id && n.status == ReadStatus::Unread {
                    n.status = ReadStatus::Read;
                    modified += 1;
                }
            }
        }
        Ok(modified)
    }

    async fn mark_all_notifications_read(&self, user_id: &UserId) -> Result<u64> {
        let mut notifications = self.notifications.write().await;
        let mut modified = 0;
        for n in notifications.values_mut() {
            if &n.user_id == user_id && n.status == ReadStatus::Unread {
                n.status = ReadStatus::Read;
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn delete_notification(
        &self,
        user_id: &UserId,
        notification_id: &NotificationId,
    ) -> Result<bool> {
        let mut notifications = self.notifications.write().await;
        match notifications.get(notification_id) {
            Some(n) if &n.user_id == user_id => {
                notifications.remove(notification_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sweep_notifications(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut notifications = self.notifications.write().await;
        let before = notifications.len();
        notifications.retain(|_, n| {
            !(matches!(n.status, ReadStatus::Read | ReadStatus::Archived)
                && n.created_at < cutoff)
        });
        Ok((before - notifications.len()) as u64)
    }

    async fn set_delivery_state(
        &self,
        notification_id: &NotificationId,
        channel: Channel,
        state: DeliveryState,
    ) -> Result<()> {
        let mut notifications = self.notifications.write().await;
        if let Some(n) = notifications.get_mut(notification_id) {
            match channel {
                Channel::InApp => n.delivery.in_app = state,
                Channel::Push => n.delivery.push = Some(state),
                Channel::Email => n.delivery.email = Some(state),
            }
        }
        Ok(())
    }

    async fn insert_match_record(&self, record: MatchRecord) -> Result<()> {
        self.match_records.write().await.push(record);
        Ok(())
    }

    async fn match_records_since(&self, since: DateTime<Utc>) -> Result<Vec<MatchRecord>> {
        let records = self.match_records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.formed_at >= since)
            .cloned()
            .collect())
    }

    async fn match_records_for_user(&self, user_id: &UserId) -> Result<Vec<MatchRecord>> {
        let records = self.match_records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.participants.contains(user_id))
            .cloned()
            .collect())
    }
}
