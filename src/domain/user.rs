use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::notification::NotificationPreferences;
use super::types::{GameId, UserId, DEFAULT_SKILL_LEVEL};

/// Account state. Only `Active` users may queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
    Banned,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Player,
    Admin,
}

/// The projection of a user the matchmaking core needs. Profile management
/// lives elsewhere; this is what enrichment and eligibility checks read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub status: UserStatus,
    pub role: UserRole,
    /// 0-100 community standing score consumed by the scorer.
    pub karma: u8,
    /// Per-game skill levels (0-100), computed upstream.
    #[serde(default)]
    pub game_skills: HashMap<GameId, u8>,
    #[serde(default)]
    pub notification_preferences: NotificationPreferences,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn skill_for(&self, game_id: &GameId) -> u8 {
        self.game_skills
            .get(game_id)
            .copied()
            .unwrap_or(DEFAULT_SKILL_LEVEL)
    }

    pub fn is_eligible(&self) -> bool {
        self.status == UserStatus::Active
    }
}
