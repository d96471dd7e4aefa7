//! Lobby lifecycle service.
//!
//! Owns every lobby mutation: membership, ready flags, host transfer, the
//! auto-start timer, and the versioned `lobby:update` snapshots pushed to
//! `lobby:<id>` rooms. Mutations to one lobby are serialized by a per-lobby
//! mutex, so snapshot versions observed by a room only ever move forward.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chat::ChatService;
use crate::domain::chat::ChatChannel;
use crate::domain::criteria::{GameMode, Region};
use crate::domain::error_codes::ErrorCode;
use crate::domain::lobby::{Lobby, LobbyCapacity, LobbyRejection, LobbySnapshot, LobbyStatus};
use crate::domain::types::{GameId, LobbyId, UserId};
use crate::socket::{EventBus, Room, ServerEvent};
use crate::storage::Storage;

/// Tunables for the lobby service.
#[derive(Debug, Clone)]
pub struct LobbyServiceConfig {
    /// Delay between a lobby entering `ready` and the automatic start.
    pub auto_start_delay: std::time::Duration,
    /// How far back closed lobbies remain visible in listings.
    pub history_window: chrono::Duration,
}

impl Default for LobbyServiceConfig {
    fn default() -> Self {
        Self {
            auto_start_delay: std::time::Duration::from_secs(5),
            history_window: chrono::Duration::hours(24),
        }
    }
}

#[derive(Debug, Error)]
pub enum LobbyError {
    #[error("lobby not found")]
    NotFound,
    #[error("lobby is full")]
    Full,
    #[error("operation is not legal in the lobby's current state")]
    IllegalState,
    #[error("caller is not a member of the lobby")]
    NotMember,
    #[error("only the host may do this")]
    NotHost,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl LobbyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound => ErrorCode::NotFound,
            Self::Full => ErrorCode::LobbyFull,
            Self::IllegalState => ErrorCode::IllegalState,
            Self::NotMember | Self::NotHost => ErrorCode::Forbidden,
            Self::Storage(_) => ErrorCode::InternalServerError,
        }
    }
}

impl From<LobbyRejection> for LobbyError {
    fn from(rejection: LobbyRejection) -> Self {
        match rejection {
            LobbyRejection::Full => LobbyError::Full,
            // Joining a non-forming lobby and acting on a closed one both
            // surface as illegal state on the wire.
            LobbyRejection::Closed | LobbyRejection::IllegalState => LobbyError::IllegalState,
            LobbyRejection::NotMember => LobbyError::NotMember,
            LobbyRejection::NotHost => LobbyError::NotHost,
        }
    }
}

pub struct LobbyService {
    storage: Arc<dyn Storage>,
    chat: Arc<ChatService>,
    bus: Arc<EventBus>,
    config: LobbyServiceConfig,
    /// Per-aggregate logical locks.
    locks: DashMap<LobbyId, Arc<Mutex<()>>>,
    /// Pending auto-start timers, keyed by lobby.
    timers: DashMap<LobbyId, JoinHandle<()>>,
}

impl LobbyService {
    pub fn new(
        storage: Arc<dyn Storage>,
        chat: Arc<ChatService>,
        bus: Arc<EventBus>,
        config: LobbyServiceConfig,
    ) -> Self {
        Self {
            storage,
            chat,
            bus,
            config,
            locks: DashMap::new(),
            timers: DashMap::new(),
        }
    }

    fn lock_for(&self, lobby_id: &LobbyId) -> Arc<Mutex<()>> {
        self.locks
            .entry(*lobby_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create a lobby (and its chat channel) for a finalized match. The
    /// caller pre-joins participants' sockets to the room and emits
    /// `lobby:created`.
    pub async fn create_for_match(
        &self,
        game_id: GameId,
        game_mode: GameMode,
        region: Region,
        host_id: UserId,
        member_ids: &[UserId],
        capacity: LobbyCapacity,
    ) -> Result<Lobby, LobbyError> {
        let now = Utc::now();
        let lobby = Lobby::for_match(
            game_id, game_mode, region, host_id, member_ids, capacity, now,
        );
        self.storage.insert_lobby(lobby.clone()).await?;
        self.storage
            .insert_channel(ChatChannel::new(lobby.id, member_ids.to_vec(), now))
            .await?;
        info!(
            lobby_id = %lobby.id,
            game_id = %lobby.game_id,
            members = member_ids.len(),
            host = %host_id,
            "lobby created from match"
        );
        Ok(lobby)
    }

    /// Member-scoped view of one lobby.
    pub async fn get(&self, lobby_id: &LobbyId, user_id: &UserId) -> Result<LobbySnapshot, LobbyError> {
        let lobby = self
            .storage
            .get_lobby(lobby_id)
            .await?
            .ok_or(LobbyError::NotFound)?;
        if !lobby.was_member(user_id) {
            // Hide existence from outsiders.
            return Err(LobbyError::NotFound);
        }
        Ok(lobby.snapshot())
    }

    /// Lobbies the user belongs to; with `include_history`, closed lobbies
    /// from the configured window as well.
    pub async fn list(
        &self,
        user_id: &UserId,
        include_history: bool,
    ) -> Result<Vec<LobbySnapshot>, LobbyError> {
        let cutoff = include_history.then(|| Utc::now() - self.config.history_window);
        let lobbies = self.storage.lobbies_for_user(user_id, cutoff).await?;
        Ok(lobbies.iter().map(Lobby::snapshot).collect())
    }

    pub async fn join(
        self: &Arc<Self>,
        lobby_id: &LobbyId,
        user_id: UserId,
    ) -> Result<LobbySnapshot, LobbyError> {
        let lock = self.lock_for(lobby_id);
        let _guard = lock.lock().await;

        let mut lobby = self
            .storage
            .get_lobby(lobby_id)
            .await?
            .ok_or(LobbyError::NotFound)?;
        lobby.join(user_id, Utc::now())?;
        self.storage.save_lobby(lobby.clone()).await?;
        self.storage.add_chat_participant(lobby_id, user_id).await?;

        self.bus.join_user(&user_id, Room::Lobby(*lobby_id));
        self.emit_room(
            lobby_id,
            ServerEvent::LobbyMemberJoined {
                lobby_id: *lobby_id,
                user_id,
            },
        );
        self.publish_snapshot(&lobby);
        let name = self.display_name(&user_id).await;
        self.chat
            .system_post(lobby_id, &format!("{name} joined"))
            .await;
        Ok(lobby.snapshot())
    }

    pub async fn leave(
        self: &Arc<Self>,
        lobby_id: &LobbyId,
        user_id: UserId,
    ) -> Result<LobbySnapshot, LobbyError> {
        let lock = self.lock_for(lobby_id);
        let _guard = lock.lock().await;

        let mut lobby = self
            .storage
            .get_lobby(lobby_id)
            .await?
            .ok_or(LobbyError::NotFound)?;
        let new_host = lobby.leave(&user_id, Utc::now())?;
        self.storage.save_lobby(lobby.clone()).await?;

        // Any membership change invalidates a pending auto-start.
        if lobby.status != LobbyStatus::Ready {
            self.cancel_auto_start(lobby_id);
        }

        self.emit_room(
            lobby_id,
            ServerEvent::LobbyMemberLeft {
                lobby_id: *lobby_id,
                user_id,
                new_host,
            },
        );
        self.publish_snapshot(&lobby);

        let name = self.display_name(&user_id).await;
        self.chat.system_post(lobby_id, &format!("{name} left")).await;
        if let Some(host) = new_host {
            let host_name = self.display_name(&host).await;
            self.chat
                .system_post(lobby_id, &format!("Host is now {host_name}"))
                .await;
        }
        if lobby.status == LobbyStatus::Closed {
            self.on_closed(lobby_id);
        }
        Ok(lobby.snapshot())
    }

    pub async fn set_ready(
        self: &Arc<Self>,
        lobby_id: &LobbyId,
        user_id: UserId,
        ready: bool,
    ) -> Result<LobbySnapshot, LobbyError> {
        let lock = self.lock_for(lobby_id);
        let _guard = lock.lock().await;

        let mut lobby = self
            .storage
            .get_lobby(lobby_id)
            .await?
            .ok_or(LobbyError::NotFound)?;
        let before = lobby.status;
        let after = lobby.set_ready(&user_id, ready, Utc::now())?;
        self.storage.save_lobby(lobby.clone()).await?;

        self.emit_room(
            lobby_id,
            ServerEvent::LobbyMemberReady {
                lobby_id: *lobby_id,
                user_id,
                ready,
            },
        );
        self.publish_snapshot(&lobby);

        match (before, after) {
            (LobbyStatus::Forming, LobbyStatus::Ready) => {
                self.chat.system_post(lobby_id, "All players ready!").await;
                if lobby.settings.auto_start {
                    self.schedule_auto_start(*lobby_id);
                }
            }
            (LobbyStatus::Ready, LobbyStatus::Forming) => {
                self.cancel_auto_start(lobby_id);
            }
            _ => {}
        }
        Ok(lobby.snapshot())
    }

    /// Host-initiated start.
    pub async fn start(
        self: &Arc<Self>,
        lobby_id: &LobbyId,
        user_id: &UserId,
    ) -> Result<LobbySnapshot, LobbyError> {
        self.start_inner(lobby_id, Some(user_id)).await
    }

    async fn start_inner(
        self: &Arc<Self>,
        lobby_id: &LobbyId,
        initiator: Option<&UserId>,
    ) -> Result<LobbySnapshot, LobbyError> {
        let lock = self.lock_for(lobby_id);
        let _guard = lock.lock().await;

        let mut lobby = self
            .storage
            .get_lobby(lobby_id)
            .await?
            .ok_or(LobbyError::NotFound)?;
        // The auto-start timer acts as the host.
        let as_user = initiator.copied().unwrap_or(lobby.host_id);
        lobby.start(&as_user, Utc::now())?;
        self.storage.save_lobby(lobby.clone()).await?;
        self.cancel_auto_start(lobby_id);

        self.publish_snapshot(&lobby);
        self.chat.system_post(lobby_id, "Game started!").await;
        info!(lobby_id = %lobby.id, by = %as_user, "lobby started");
        Ok(lobby.snapshot())
    }

    /// Close the lobby. `trusted` is reserved for internal callers
    /// (compensation, moderation); HTTP always passes false.
    pub async fn close(
        self: &Arc<Self>,
        lobby_id: &LobbyId,
        user_id: &UserId,
        trusted: bool,
    ) -> Result<LobbySnapshot, LobbyError> {
        let lock = self.lock_for(lobby_id);
        let _guard = lock.lock().await;

        let mut lobby = self
            .storage
            .get_lobby(lobby_id)
            .await?
            .ok_or(LobbyError::NotFound)?;
        lobby.close(user_id, trusted, Utc::now())?;
        self.storage.save_lobby(lobby.clone()).await?;

        self.publish_snapshot(&lobby);
        self.on_closed(lobby_id);
        info!(lobby_id = %lobby.id, by = %user_id, trusted, "lobby closed");
        Ok(lobby.snapshot())
    }

    fn schedule_auto_start(self: &Arc<Self>, lobby_id: LobbyId) {
        self.cancel_auto_start(&lobby_id);
        let service = Arc::clone(self);
        let delay = self.config.auto_start_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            service.timers.remove(&lobby_id);
            match service.start_inner(&lobby_id, None).await {
                Ok(_) => debug!(%lobby_id, "auto-start fired"),
                // The ready predicate can stop holding between scheduling
                // and firing; that is a normal cancellation race.
                Err(LobbyError::IllegalState | LobbyError::NotFound) => {
                    debug!(%lobby_id, "auto-start found lobby no longer ready");
                }
                Err(err) => warn!(%lobby_id, error = %err, "auto-start failed"),
            }
        });
        self.timers.insert(lobby_id, handle);
    }

    fn cancel_auto_start(&self, lobby_id: &LobbyId) {
        if let Some((_, handle)) = self.timers.remove(lobby_id) {
            handle.abort();
            debug!(%lobby_id, "auto-start timer cancelled");
        }
    }

    fn on_closed(&self, lobby_id: &LobbyId) {
        self.cancel_auto_start(lobby_id);
        self.locks.remove(lobby_id);
    }

    fn publish_snapshot(&self, lobby: &Lobby) {
        self.emit_room(
            &lobby.id,
            ServerEvent::LobbyUpdate {
                lobby: Box::new(lobby.snapshot()),
            },
        );
    }

    fn emit_room(&self, lobby_id: &LobbyId, event: ServerEvent) {
        self.bus.emit_room(&Room::Lobby(*lobby_id), &Arc::new(event));
    }

    async fn display_name(&self, user_id: &UserId) -> String {
        match self.storage.get_user(user_id).await {
            Ok(Some(user)) => user.display_name,
            Ok(None) => "a player".to_string(),
            Err(err) => {
                error!(%user_id, error = %err, "failed to load user for chat message");
                "a player".to_string()
            }
        }
    }

    /// Abort all pending timers (process shutdown).
    pub fn shutdown(&self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
        self.timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::user::{User, UserRole, UserStatus};
    use crate::storage::MemoryStorage;
    use std::collections::HashMap;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    async fn seed_user(storage: &Arc<MemoryStorage>, name: &str) -> UserId {
        let user = User {
            id: Uuid::new_v4(),
            display_name: name.into(),
            status: UserStatus::Active,
            role: UserRole::Player,
            karma: 50,
            game_skills: HashMap::new(),
            notification_preferences: Default::default(),
            created_at: Utc::now(),
        };
        let id = user.id;
        storage.upsert_user(user).await.unwrap();
        id
    }

    async fn setup(
        auto_start_ms: u64,
    ) -> (Arc<LobbyService>, Arc<MemoryStorage>, Arc<EventBus>, Vec<UserId>) {
        let storage = Arc::new(MemoryStorage::new());
        let bus = Arc::new(EventBus::new());
        let chat = Arc::new(ChatService::new(storage.clone(), bus.clone()));
        let service = Arc::new(LobbyService::new(
            storage.clone(),
            chat,
            bus.clone(),
            LobbyServiceConfig {
                auto_start_delay: std::time::Duration::from_millis(auto_start_ms),
                history_window: chrono::Duration::hours(24),
            },
        ));
        let mut users = vec![
            seed_user(&storage, "alice").await,
            seed_user(&storage, "bob").await,
            seed_user(&storage, "carol").await,
        ];
        users.sort();
        (service, storage, bus, users)
    }

    async fn make_lobby(
        service: &Arc<LobbyService>,
        members: &[UserId],
        min: u8,
        max: u8,
    ) -> Lobby {
        service
            .create_for_match(
                "rocket-rumble".into(),
                GameMode::Competitive,
                Region::Na,
                members[0],
                members,
                LobbyCapacity { min, max },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn ready_flow_reaches_ready_and_auto_starts() {
        let (service, storage, _bus, users) = setup(40).await;
        let lobby = make_lobby(&service, &users[..2], 2, 2).await;

        service.set_ready(&lobby.id, users[0], true).await.unwrap();
        let snapshot = service.set_ready(&lobby.id, users[1], true).await.unwrap();
        assert_eq!(snapshot.status, LobbyStatus::Ready);

        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        let after = storage.get_lobby(&lobby.id).await.unwrap().unwrap();
        assert_eq!(after.status, LobbyStatus::Active, "auto-start should fire");
        assert!(after.active_at.is_some());
    }

    #[tokio::test]
    async fn unready_cancels_auto_start() {
        let (service, storage, _bus, users) = setup(60).await;
        let lobby = make_lobby(&service, &users[..2], 2, 2).await;

        service.set_ready(&lobby.id, users[0], true).await.unwrap();
        service.set_ready(&lobby.id, users[1], true).await.unwrap();
        // Flip one member back before the timer fires.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let snapshot = service.set_ready(&lobby.id, users[0], false).await.unwrap();
        assert_eq!(snapshot.status, LobbyStatus::Forming);

        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        let after = storage.get_lobby(&lobby.id).await.unwrap().unwrap();
        assert_eq!(
            after.status,
            LobbyStatus::Forming,
            "cancelled timer must not start the lobby"
        );
    }

    #[tokio::test]
    async fn host_start_requires_ready_state() {
        let (service, _storage, _bus, users) = setup(10_000).await;
        let lobby = make_lobby(&service, &users[..2], 2, 2).await;

        assert!(matches!(
            service.start(&lobby.id, &users[0]).await,
            Err(LobbyError::IllegalState)
        ));
        service.set_ready(&lobby.id, users[0], true).await.unwrap();
        service.set_ready(&lobby.id, users[1], true).await.unwrap();

        assert!(matches!(
            service.start(&lobby.id, &users[1]).await,
            Err(LobbyError::NotHost)
        ));
        let snapshot = service.start(&lobby.id, &users[0]).await.unwrap();
        assert_eq!(snapshot.status, LobbyStatus::Active);
    }

    #[tokio::test]
    async fn host_leave_transfers_and_announces() {
        let (service, storage, bus, users) = setup(10_000).await;
        let lobby = make_lobby(&service, &users, 2, 3).await;

        // Stagger join order so users[1] is the longest-joined non-host.
        {
            let mut stored = storage.get_lobby(&lobby.id).await.unwrap().unwrap();
            stored.members[1].joined_at = Utc::now() - chrono::Duration::seconds(30);
            stored.members[2].joined_at = Utc::now() - chrono::Duration::seconds(5);
            storage.save_lobby(stored).await.unwrap();
        }

        let (tx, mut rx) = mpsc::channel(16);
        let conn = bus.register(users[1], tx);
        bus.join(conn, Room::Lobby(lobby.id));

        service.leave(&lobby.id, users[0]).await.unwrap();

        let stored = storage.get_lobby(&lobby.id).await.unwrap().unwrap();
        assert_eq!(stored.host_id, users[1]);

        // member:left carries the new host, then a snapshot, then the chat
        // announcements.
        let mut saw_left = false;
        let mut saw_host_message = false;
        while let Ok(event) = rx.try_recv() {
            match &*event {
                ServerEvent::LobbyMemberLeft { new_host, .. } => {
                    assert_eq!(*new_host, Some(users[1]));
                    saw_left = true;
                }
                ServerEvent::ChatMessage { message, .. } => {
                    if message.content.starts_with("Host is now") {
                        saw_host_message = true;
                    }
                }
                _ => {}
            }
        }
        assert!(saw_left);
        assert!(saw_host_message, "host transfer must be announced in chat");
    }

    #[tokio::test]
    async fn rejoin_resets_slot() {
        let (service, _storage, _bus, users) = setup(10_000).await;
        let lobby = make_lobby(&service, &users[..2], 1, 3).await;

        service.set_ready(&lobby.id, users[1], true).await.unwrap();
        service.leave(&lobby.id, users[1]).await.unwrap();
        let snapshot = service.join(&lobby.id, users[1]).await.unwrap();

        let member = snapshot
            .members
            .iter()
            .find(|m| m.user_id == users[1])
            .unwrap();
        assert!(!member.is_ready);
        assert_eq!(snapshot.member_count, 2);
    }

    #[tokio::test]
    async fn join_full_lobby_fails() {
        let (service, _storage, _bus, users) = setup(10_000).await;
        let lobby = make_lobby(&service, &users[..2], 2, 2).await;
        assert!(matches!(
            service.join(&lobby.id, users[2]).await,
            Err(LobbyError::Full)
        ));
    }

    #[tokio::test]
    async fn last_leave_closes_and_listing_honours_history_flag() {
        let (service, _storage, _bus, users) = setup(10_000).await;
        let lobby = make_lobby(&service, &users[..2], 1, 2).await;

        service.leave(&lobby.id, users[0]).await.unwrap();
        let snapshot = service.leave(&lobby.id, users[1]).await.unwrap();
        assert_eq!(snapshot.status, LobbyStatus::Closed);

        let current = service.list(&users[1], false).await.unwrap();
        assert!(current.is_empty());
        let with_history = service.list(&users[1], true).await.unwrap();
        assert_eq!(with_history.len(), 1);
        assert_eq!(with_history[0].status, LobbyStatus::Closed);
    }

    #[tokio::test]
    async fn get_hides_lobbies_from_outsiders() {
        let (service, _storage, _bus, users) = setup(10_000).await;
        let lobby = make_lobby(&service, &users[..2], 2, 2).await;

        assert!(service.get(&lobby.id, &users[0]).await.is_ok());
        assert!(matches!(
            service.get(&lobby.id, &users[2]).await,
            Err(LobbyError::NotFound)
        ));
    }

    #[tokio::test]
    async fn snapshots_version_monotonically() {
        let (service, bus, users) = {
            let (s, _st, b, u) = setup(10_000).await;
            (s, b, u)
        };
        let lobby = make_lobby(&service, &users[..2], 2, 3).await;

        let (tx, mut rx) = mpsc::channel(32);
        let conn = bus.register(users[0], tx);
        bus.join(conn, Room::Lobby(lobby.id));

        service.set_ready(&lobby.id, users[0], true).await.unwrap();
        service.set_ready(&lobby.id, users[1], true).await.unwrap();
        service.set_ready(&lobby.id, users[0], false).await.unwrap();

        let mut last_version = 0;
        while let Ok(event) = rx.try_recv() {
            if let ServerEvent::LobbyUpdate { lobby } = &*event {
                assert!(lobby.version > last_version, "versions must increase");
                last_version = lobby.version;
            }
        }
        assert!(last_version > 0);
    }
}
