use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::criteria::MatchCriteria;
use super::types::{GameId, LobbyId, RequestId, UserId};

/// Lifecycle state of a match request.
///
/// `Searching` is the only non-terminal state; once a request leaves it the
/// request never reopens (a resubmission gets a fresh id).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Searching,
    Matched,
    Cancelled,
    Expired,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        self != RequestStatus::Searching
    }
}

/// A player's active (or historical) matchmaking request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequest {
    pub id: RequestId,
    pub user_id: UserId,
    pub criteria: MatchCriteria,
    pub status: RequestStatus,
    /// Resolved at submit time from the highest-weighted game.
    pub primary_game: GameId,
    /// Monotonically non-decreasing, 0..=3.
    pub relaxation_level: u8,
    /// For scheduled requests this is the scheduled instant; wait time and
    /// relaxation both measure from here.
    pub search_start_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_lobby: Option<LobbyId>,
}

impl MatchRequest {
    /// Build a new searching request. The caller is expected to have
    /// validated `criteria` already; `primary_game` resolution is the one
    /// invariant enforced here.
    pub fn new(user_id: UserId, criteria: MatchCriteria, now: DateTime<Utc>) -> Option<Self> {
        let primary_game = criteria.primary_game()?.clone();
        let search_start_time = criteria.scheduled_time.unwrap_or(now);
        Some(Self {
            id: Uuid::new_v4(),
            user_id,
            criteria,
            status: RequestStatus::Searching,
            primary_game,
            relaxation_level: 0,
            search_start_time,
            created_at: now,
            completed_at: None,
            matched_lobby: None,
        })
    }

    /// How long the request has been (visibly) searching. Zero until a
    /// scheduled start time is reached.
    pub fn search_duration(&self, now: DateTime<Utc>) -> Duration {
        (now - self.search_start_time).max(Duration::zero())
    }

    /// A scheduled request is not eligible for the queue before its time.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.search_start_time <= now
    }

    pub fn is_searching(&self) -> bool {
        self.status == RequestStatus::Searching
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::criteria::{
        GameMode, GameSelection, GroupSize, PreferenceStrength, Region, SkillPreference,
    };

    fn criteria() -> MatchCriteria {
        MatchCriteria {
            games: vec![
                GameSelection {
                    game_id: "alpha".into(),
                    weight: 3,
                },
                GameSelection {
                    game_id: "beta".into(),
                    weight: 8,
                },
            ],
            game_mode: GameMode::Casual,
            regions: vec![Region::Eu],
            region_preference: PreferenceStrength::Preferred,
            languages: Vec::new(),
            language_preference: PreferenceStrength::Any,
            skill_preference: SkillPreference::Any,
            group_size: GroupSize { min: 2, max: 2 },
            scheduled_time: None,
            preselected_users: Vec::new(),
        }
    }

    #[test]
    fn new_request_resolves_primary_game() {
        let now = Utc::now();
        let request = MatchRequest::new(Uuid::new_v4(), criteria(), now).unwrap();
        assert_eq!(request.primary_game, "beta");
        assert_eq!(request.status, RequestStatus::Searching);
        assert_eq!(request.relaxation_level, 0);
        assert_eq!(request.search_start_time, now);
    }

    #[test]
    fn scheduled_request_starts_at_schedule() {
        let now = Utc::now();
        let scheduled = now + Duration::hours(2);
        let mut c = criteria();
        c.scheduled_time = Some(scheduled);
        let request = MatchRequest::new(Uuid::new_v4(), c, now).unwrap();
        assert_eq!(request.search_start_time, scheduled);
        assert!(!request.is_due(now));
        assert!(request.is_due(scheduled));
        // Duration never goes negative before the scheduled instant.
        assert_eq!(request.search_duration(now), Duration::zero());
    }

    #[test]
    fn terminal_states() {
        assert!(!RequestStatus::Searching.is_terminal());
        assert!(RequestStatus::Matched.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
        assert!(RequestStatus::Expired.is_terminal());
    }
}
