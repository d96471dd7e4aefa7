use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::criteria::{GameMode, Region};
use super::types::{GameId, LobbyId, UserId};

// ============================================================================
// LOBBY LIFECYCLE
// ============================================================================
//
// ```text
// [*] --> Forming: match finalized
//
// Forming --> Forming: join / leave / ready (membership mutations)
// Forming --> Ready:   all ready AND member count within capacity
// Ready   --> Forming: any member un-readies or leaves
// Ready   --> Active:  host start OR auto-start timer fires
// Active  --> Closed:  host end OR member count falls below capacity.min
// any     --> Closed:  last member leaves
// ```
//
// Status is monotone along forming -> ready -> active -> closed, with the one
// sanctioned exception that `Ready` reverts to `Forming` when the ready
// predicate stops holding (the lobby has not advanced yet at that point).
//
// Membership rules:
// - At most one member entry per user; a rejoin after `Left`/`Kicked` reuses
//   the slot and resets it to `Joined` with the ready flag cleared.
// - Exactly one member is host whenever the member count is positive. When
//   the host leaves, the longest-joined remaining active member inherits the
//   slot (ties broken by ascending user id).
// - Joins are only accepted while `Forming`.
//
// Every mutation bumps `version`; snapshot consumers drop stale versions.
// ============================================================================

/// Lobby lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    Forming,
    Ready,
    Active,
    Closed,
}

/// Membership state of a single member slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemberState {
    Joined,
    Ready,
    Left,
    Kicked,
}

impl MemberState {
    /// Counted towards `member_count`.
    pub fn is_active(self) -> bool {
        matches!(self, MemberState::Joined | MemberState::Ready)
    }
}

/// One member slot. Slots are reused across leave/rejoin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyMember {
    pub user_id: UserId,
    pub state: MemberState,
    pub is_host: bool,
    pub is_ready: bool,
    pub joined_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_at: Option<DateTime<Utc>>,
}

/// Capacity window inherited from the formed match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LobbyCapacity {
    pub min: u8,
    pub max: u8,
}

/// Host-adjustable lobby settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySettings {
    pub is_private: bool,
    pub allow_spectators: bool,
    pub auto_start: bool,
    pub auto_close: bool,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            is_private: false,
            allow_spectators: true,
            auto_start: true,
            auto_close: true,
        }
    }
}

/// A lobby created from a finalized match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lobby {
    pub id: LobbyId,
    pub game_id: GameId,
    pub game_mode: GameMode,
    pub region: Region,
    pub host_id: UserId,
    pub members: Vec<LobbyMember>,
    pub capacity: LobbyCapacity,
    pub status: LobbyStatus,
    /// Incremented on every mutation; snapshots carry it so clients can drop
    /// out-of-order updates.
    pub version: u64,
    pub formed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    pub settings: LobbySettings,
}

/// Why a lobby mutation was refused. Pure entity-level outcomes; services map
/// these onto wire error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyRejection {
    Full,
    Closed,
    NotMember,
    IllegalState,
    NotHost,
}

impl Lobby {
    /// Create a lobby for a formed match. `members` must be non-empty and
    /// contain the host.
    pub fn for_match(
        game_id: GameId,
        game_mode: GameMode,
        region: Region,
        host_id: UserId,
        member_ids: &[UserId],
        capacity: LobbyCapacity,
        now: DateTime<Utc>,
    ) -> Self {
        let members = member_ids
            .iter()
            .map(|user_id| LobbyMember {
                user_id: *user_id,
                state: MemberState::Joined,
                is_host: *user_id == host_id,
                is_ready: false,
                joined_at: now,
                left_at: None,
            })
            .collect();
        Self {
            id: Uuid::new_v4(),
            game_id,
            game_mode,
            region,
            host_id,
            members,
            capacity,
            status: LobbyStatus::Forming,
            version: 1,
            formed_at: now,
            ready_at: None,
            active_at: None,
            closed_at: None,
            settings: LobbySettings::default(),
        }
    }

    pub fn member(&self, user_id: &UserId) -> Option<&LobbyMember> {
        self.members.iter().find(|m| &m.user_id == user_id)
    }

    fn member_mut(&mut self, user_id: &UserId) -> Option<&mut LobbyMember> {
        self.members.iter_mut().find(|m| &m.user_id == user_id)
    }

    /// Count of joined + ready members. Never persisted.
    pub fn member_count(&self) -> usize {
        self.members.iter().filter(|m| m.state.is_active()).count()
    }

    /// Count of ready flags among active members.
    pub fn ready_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.state.is_active() && m.is_ready)
            .count()
    }

    /// `member_count in [min,max] AND ready_count == member_count`.
    pub fn ready_predicate(&self) -> bool {
        let count = self.member_count();
        self.capacity.contains(count) && self.ready_count() == count
    }

    pub fn is_member_active(&self, user_id: &UserId) -> bool {
        self.member(user_id).is_some_and(|m| m.state.is_active())
    }

    /// Whether the user ever held a slot (read access to chat history).
    pub fn was_member(&self, user_id: &UserId) -> bool {
        self.member(user_id).is_some()
    }

    fn touch(&mut self) {
        self.version += 1;
    }

    /// Join or rejoin. Only legal while `Forming`.
    pub fn join(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<(), LobbyRejection> {
        if self.status != LobbyStatus::Forming {
            return Err(LobbyRejection::Closed);
        }
        if let Some(member) = self.member(&user_id) {
            if member.state.is_active() {
                // Idempotent: already in.
                return Ok(());
            }
        }
        if self.member_count() >= usize::from(self.capacity.max) {
            return Err(LobbyRejection::Full);
        }

        match self.member_mut(&user_id) {
            Some(member) => {
                member.state = MemberState::Joined;
                member.is_ready = false;
                member.left_at = None;
            }
            None => {
                self.members.push(LobbyMember {
                    user_id,
                    state: MemberState::Joined,
                    is_host: false,
                    is_ready: false,
                    joined_at: now,
                    left_at: None,
                });
            }
        }
        if self.member_count() == 1 {
            self.assign_host(user_id);
        }
        self.touch();
        Ok(())
    }

    /// Mark a member as left. Returns the newly elected host if the host slot
    /// moved. Transitions to `Closed` when the last member leaves.
    pub fn leave(
        &mut self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<UserId>, LobbyRejection> {
        if self.status == LobbyStatus::Closed {
            return Err(LobbyRejection::Closed);
        }
        let was_host;
        match self.member_mut(user_id) {
            Some(member) if member.state.is_active() => {
                was_host = member.is_host;
                member.state = MemberState::Left;
                member.is_ready = false;
                member.is_host = false;
                member.left_at = Some(now);
            }
            _ => return Err(LobbyRejection::NotMember),
        }

        let mut new_host = None;
        if self.member_count() == 0 {
            self.close_internal(now);
        } else {
            if was_host {
                new_host = self.elect_host();
            }
            // Ready lobbies fall back to forming when membership changes.
            if self.status == LobbyStatus::Ready && !self.ready_predicate() {
                self.status = LobbyStatus::Forming;
                self.ready_at = None;
            }
            // An active lobby that falls below its minimum closes.
            if self.status == LobbyStatus::Active
                && self.member_count() < usize::from(self.capacity.min)
            {
                self.close_internal(now);
            }
        }
        self.touch();
        Ok(new_host)
    }

    /// Longest-joined active member becomes host; ties break by ascending
    /// user id.
    fn elect_host(&mut self) -> Option<UserId> {
        let candidate = self
            .members
            .iter()
            .filter(|m| m.state.is_active())
            .min_by(|a, b| {
                a.joined_at
                    .cmp(&b.joined_at)
                    .then_with(|| a.user_id.cmp(&b.user_id))
            })
            .map(|m| m.user_id)?;
        self.assign_host(candidate);
        Some(candidate)
    }

    fn assign_host(&mut self, user_id: UserId) {
        for member in &mut self.members {
            member.is_host = member.user_id == user_id;
        }
        self.host_id = user_id;
    }

    /// Flip a ready flag. Legal in `Forming` and `Ready`; readying the last
    /// member advances to `Ready`, un-readying while `Ready` reverts.
    /// Returns the status after the mutation.
    pub fn set_ready(
        &mut self,
        user_id: &UserId,
        ready: bool,
        now: DateTime<Utc>,
    ) -> Result<LobbyStatus, LobbyRejection> {
        if !matches!(self.status, LobbyStatus::Forming | LobbyStatus::Ready) {
            return Err(LobbyRejection::IllegalState);
        }
        match self.member_mut(user_id) {
            Some(member) if member.state.is_active() => {
                member.is_ready = ready;
                member.state = if ready {
                    MemberState::Ready
                } else {
                    MemberState::Joined
                };
            }
            _ => return Err(LobbyRejection::NotMember),
        }

        if self.status == LobbyStatus::Forming && self.ready_predicate() {
            self.status = LobbyStatus::Ready;
            self.ready_at = Some(now);
        } else if self.status == LobbyStatus::Ready && !self.ready_predicate() {
            self.status = LobbyStatus::Forming;
            self.ready_at = None;
        }
        self.touch();
        Ok(self.status)
    }

    /// Host-driven (or auto-start) transition to `Active`.
    pub fn start(
        &mut self,
        initiator: &UserId,
        now: DateTime<Utc>,
    ) -> Result<(), LobbyRejection> {
        if self.host_id != *initiator {
            return Err(LobbyRejection::NotHost);
        }
        if self.status != LobbyStatus::Ready {
            return Err(LobbyRejection::IllegalState);
        }
        self.status = LobbyStatus::Active;
        self.active_at = Some(now);
        self.touch();
        Ok(())
    }

    /// Terminal transition. `trusted` callers (the server itself) bypass the
    /// host check.
    pub fn close(
        &mut self,
        initiator: &UserId,
        trusted: bool,
        now: DateTime<Utc>,
    ) -> Result<(), LobbyRejection> {
        if !trusted && self.host_id != *initiator {
            return Err(LobbyRejection::NotHost);
        }
        if self.status == LobbyStatus::Closed {
            return Err(LobbyRejection::IllegalState);
        }
        self.close_internal(now);
        self.touch();
        Ok(())
    }

    fn close_internal(&mut self, now: DateTime<Utc>) {
        self.status = LobbyStatus::Closed;
        self.closed_at = Some(now);
    }

    /// Serializable snapshot published on every mutation.
    pub fn snapshot(&self) -> LobbySnapshot {
        LobbySnapshot {
            id: self.id,
            game_id: self.game_id.clone(),
            game_mode: self.game_mode,
            region: self.region,
            host_id: self.host_id,
            status: self.status,
            version: self.version,
            capacity: self.capacity,
            member_count: self.member_count(),
            ready_count: self.ready_count(),
            members: self
                .members
                .iter()
                .map(|m| MemberSnapshot {
                    user_id: m.user_id,
                    state: m.state,
                    is_host: m.is_host,
                    is_ready: m.is_ready,
                    joined_at: m.joined_at,
                })
                .collect(),
            settings: self.settings.clone(),
            formed_at: self.formed_at,
            ready_at: self.ready_at,
            active_at: self.active_at,
            closed_at: self.closed_at,
        }
    }
}

/// Point-in-time view of a lobby published to `lobby:<id>` rooms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySnapshot {
    pub id: LobbyId,
    pub game_id: GameId,
    pub game_mode: GameMode,
    pub region: Region,
    pub host_id: UserId,
    pub status: LobbyStatus,
    pub version: u64,
    pub capacity: LobbyCapacity,
    pub member_count: usize,
    pub ready_count: usize,
    pub members: Vec<MemberSnapshot>,
    pub settings: LobbySettings,
    pub formed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSnapshot {
    pub user_id: UserId,
    pub state: MemberState,
    pub is_host: bool,
    pub is_ready: bool,
    pub joined_at: DateTime<Utc>,
}

impl LobbyCapacity {
    pub fn contains(&self, count: usize) -> bool {
        count >= usize::from(self.min) && count <= usize::from(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::criteria::{GameMode, Region};
    use chrono::Duration;

    fn lobby_of(member_ids: &[UserId], min: u8, max: u8) -> Lobby {
        Lobby::for_match(
            "rocket-rumble".into(),
            GameMode::Competitive,
            Region::Na,
            member_ids[0],
            member_ids,
            LobbyCapacity { min, max },
            Utc::now(),
        )
    }

    fn users(n: usize) -> Vec<UserId> {
        let mut ids: Vec<UserId> = (0..n).map(|_| Uuid::new_v4()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn formed_lobby_has_single_host() {
        let ids = users(3);
        let lobby = lobby_of(&ids, 2, 3);
        assert_eq!(lobby.status, LobbyStatus::Forming);
        assert_eq!(lobby.member_count(), 3);
        assert_eq!(
            lobby.members.iter().filter(|m| m.is_host).count(),
            1,
            "exactly one host"
        );
        assert_eq!(lobby.host_id, ids[0]);
    }

    #[test]
    fn all_ready_advances_to_ready() {
        let ids = users(2);
        let mut lobby = lobby_of(&ids, 2, 2);
        let now = Utc::now();
        assert_eq!(
            lobby.set_ready(&ids[0], true, now).unwrap(),
            LobbyStatus::Forming
        );
        assert_eq!(
            lobby.set_ready(&ids[1], true, now).unwrap(),
            LobbyStatus::Ready
        );
        assert!(lobby.ready_at.is_some());
    }

    #[test]
    fn unready_reverts_ready_to_forming() {
        let ids = users(2);
        let mut lobby = lobby_of(&ids, 2, 2);
        let now = Utc::now();
        lobby.set_ready(&ids[0], true, now).unwrap();
        lobby.set_ready(&ids[1], true, now).unwrap();
        assert_eq!(
            lobby.set_ready(&ids[0], false, now).unwrap(),
            LobbyStatus::Forming
        );
        assert!(lobby.ready_at.is_none());
    }

    #[test]
    fn ready_rejected_after_start() {
        let ids = users(2);
        let mut lobby = lobby_of(&ids, 2, 2);
        let now = Utc::now();
        lobby.set_ready(&ids[0], true, now).unwrap();
        lobby.set_ready(&ids[1], true, now).unwrap();
        lobby.start(&ids[0], now).unwrap();
        assert_eq!(
            lobby.set_ready(&ids[0], false, now),
            Err(LobbyRejection::IllegalState)
        );
    }

    #[test]
    fn only_host_starts_and_only_from_ready() {
        let ids = users(2);
        let mut lobby = lobby_of(&ids, 2, 2);
        let now = Utc::now();
        assert_eq!(lobby.start(&ids[1], now), Err(LobbyRejection::NotHost));
        assert_eq!(lobby.start(&ids[0], now), Err(LobbyRejection::IllegalState));

        lobby.set_ready(&ids[0], true, now).unwrap();
        lobby.set_ready(&ids[1], true, now).unwrap();
        assert!(lobby.start(&ids[0], now).is_ok());
        assert_eq!(lobby.status, LobbyStatus::Active);
    }

    #[test]
    fn join_rejected_outside_forming() {
        let ids = users(2);
        let mut lobby = lobby_of(&ids, 2, 3);
        let now = Utc::now();
        lobby.set_ready(&ids[0], true, now).unwrap();
        lobby.set_ready(&ids[1], true, now).unwrap();
        assert_eq!(lobby.status, LobbyStatus::Ready);
        assert_eq!(
            lobby.join(Uuid::new_v4(), now),
            Err(LobbyRejection::Closed)
        );
    }

    #[test]
    fn join_rejected_when_full() {
        let ids = users(2);
        let mut lobby = lobby_of(&ids, 2, 2);
        assert_eq!(
            lobby.join(Uuid::new_v4(), Utc::now()),
            Err(LobbyRejection::Full)
        );
    }

    #[test]
    fn rejoin_reuses_slot_with_cleared_ready_flag() {
        let ids = users(3);
        let mut lobby = lobby_of(&ids, 2, 3);
        let now = Utc::now();
        lobby.set_ready(&ids[2], true, now).unwrap();
        lobby.leave(&ids[2], now).unwrap();
        assert_eq!(lobby.member_count(), 2);

        lobby.join(ids[2], now + Duration::seconds(5)).unwrap();
        let member = lobby.member(&ids[2]).unwrap();
        assert_eq!(member.state, MemberState::Joined);
        assert!(!member.is_ready);
        assert!(member.left_at.is_none());
        // The slot was reused, not duplicated.
        assert_eq!(lobby.members.len(), 3);
    }

    #[test]
    fn host_leaving_transfers_to_longest_joined() {
        let ids = users(3);
        let mut lobby = lobby_of(&ids, 2, 3);
        let now = Utc::now();
        // Stagger join order: make member 1 the oldest non-host.
        lobby.members[1].joined_at = now - Duration::seconds(30);
        lobby.members[2].joined_at = now - Duration::seconds(10);

        let new_host = lobby.leave(&ids[0], now).unwrap();
        assert_eq!(new_host, Some(ids[1]));
        assert_eq!(lobby.host_id, ids[1]);
        assert_eq!(lobby.members.iter().filter(|m| m.is_host).count(), 1);
    }

    #[test]
    fn host_tie_breaks_by_ascending_user_id() {
        let ids = users(3);
        let mut lobby = lobby_of(&ids, 2, 3);
        let joined = lobby.members[0].joined_at;
        for member in &mut lobby.members {
            member.joined_at = joined;
        }
        let new_host = lobby.leave(&ids[0], Utc::now()).unwrap();
        // ids are sorted ascending; the smallest remaining wins the tie.
        assert_eq!(new_host, Some(ids[1]));
    }

    #[test]
    fn last_member_leaving_closes_lobby() {
        let ids = users(2);
        let mut lobby = lobby_of(&ids, 1, 2);
        let now = Utc::now();
        lobby.leave(&ids[0], now).unwrap();
        assert_eq!(lobby.status, LobbyStatus::Forming);
        lobby.leave(&ids[1], now).unwrap();
        assert_eq!(lobby.status, LobbyStatus::Closed);
        assert!(lobby.closed_at.is_some());
    }

    #[test]
    fn active_lobby_below_min_closes() {
        let ids = users(2);
        let mut lobby = lobby_of(&ids, 2, 2);
        let now = Utc::now();
        lobby.set_ready(&ids[0], true, now).unwrap();
        lobby.set_ready(&ids[1], true, now).unwrap();
        lobby.start(&ids[0], now).unwrap();

        lobby.leave(&ids[1], now).unwrap();
        assert_eq!(lobby.status, LobbyStatus::Closed);
    }

    #[test]
    fn close_requires_host_unless_trusted() {
        let ids = users(2);
        let mut lobby = lobby_of(&ids, 2, 2);
        let now = Utc::now();
        assert_eq!(
            lobby.close(&ids[1], false, now),
            Err(LobbyRejection::NotHost)
        );
        assert!(lobby.close(&ids[1], true, now).is_ok());
        assert_eq!(lobby.status, LobbyStatus::Closed);
    }

    #[test]
    fn version_increases_on_every_mutation() {
        let ids = users(2);
        let mut lobby = lobby_of(&ids, 2, 3);
        let now = Utc::now();
        let v0 = lobby.version;
        lobby.set_ready(&ids[0], true, now).unwrap();
        let v1 = lobby.version;
        lobby.leave(&ids[0], now).unwrap();
        let v2 = lobby.version;
        assert!(v0 < v1 && v1 < v2);
    }

    #[test]
    fn status_order_is_monotone() {
        assert!(LobbyStatus::Forming < LobbyStatus::Ready);
        assert!(LobbyStatus::Ready < LobbyStatus::Active);
        assert!(LobbyStatus::Active < LobbyStatus::Closed);
    }
}
