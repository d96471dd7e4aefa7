use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::types::{
    GameId, UserId, MAX_GAMES_PER_REQUEST, MAX_GAME_WEIGHT, MAX_GROUP_SIZE,
    MAX_LANGUAGES_PER_REQUEST, MAX_SCHEDULE_AHEAD_DAYS, MIN_GAME_WEIGHT,
};

/// Game mode a request queues for. Mismatched modes are never comparable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Casual,
    Competitive,
    Ranked,
    Custom,
}

/// Matchmaking region. `Any` overlaps with everything.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    #[serde(rename = "NA")]
    Na,
    #[serde(rename = "EU")]
    Eu,
    #[serde(rename = "AS")]
    As,
    #[serde(rename = "SA")]
    Sa,
    #[serde(rename = "OC")]
    Oc,
    #[serde(rename = "AF")]
    Af,
    #[serde(rename = "ANY")]
    Any,
}

/// How hard a region or language constraint is.
///
/// Relaxation only ever widens: strict -> preferred -> any.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceStrength {
    Strict,
    #[default]
    Preferred,
    Any,
}

/// Whether skill proximity gates compatibility.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SkillPreference {
    #[default]
    Similar,
    Any,
}

/// One weighted game choice inside a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameSelection {
    pub game_id: GameId,
    pub weight: u8,
}

/// Requested group size window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupSize {
    pub min: u8,
    pub max: u8,
}

impl GroupSize {
    /// Intersection of two windows, if any point is shared.
    pub fn intersect(&self, other: &GroupSize) -> Option<GroupSize> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        (min <= max).then_some(GroupSize { min, max })
    }

    pub fn contains(&self, size: usize) -> bool {
        size >= usize::from(self.min) && size <= usize::from(self.max)
    }
}

/// A single validation failure, reported per field on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// The matchmaking criteria a player submits.
///
/// Stored criteria are immutable for the lifetime of the request; relaxation
/// derives an *effective* view and never writes back here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchCriteria {
    /// Weighted game choices; the highest weight decides the primary game.
    pub games: Vec<GameSelection>,
    pub game_mode: GameMode,
    pub regions: Vec<Region>,
    #[serde(default)]
    pub region_preference: PreferenceStrength,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub language_preference: PreferenceStrength,
    #[serde(default)]
    pub skill_preference: SkillPreference,
    pub group_size: GroupSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preselected_users: Vec<UserId>,
}

impl MatchCriteria {
    /// The highest-weighted game; ties broken by array order (first wins).
    pub fn primary_game(&self) -> Option<&GameId> {
        self.games
            .iter()
            .fold(None::<&GameSelection>, |best, candidate| match best {
                Some(current) if candidate.weight > current.weight => Some(candidate),
                None => Some(candidate),
                keep => keep,
            })
            .map(|g| &g.game_id)
    }

    /// Validate every field, collecting all failures.
    pub fn validate(&self, submitter: &UserId, now: DateTime<Utc>) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if self.games.is_empty() {
            errors.push(FieldError::new("games", "at least one game is required"));
        } else if self.games.len() > MAX_GAMES_PER_REQUEST {
            errors.push(FieldError::new(
                "games",
                format!("at most {MAX_GAMES_PER_REQUEST} games may be listed"),
            ));
        }
        let mut seen_games = HashSet::new();
        for selection in &self.games {
            if selection.game_id.trim().is_empty() {
                errors.push(FieldError::new("games", "game id must be non-empty"));
            }
            if !(MIN_GAME_WEIGHT..=MAX_GAME_WEIGHT).contains(&selection.weight) {
                errors.push(FieldError::new(
                    "games",
                    format!(
                        "weight for {} must be within {MIN_GAME_WEIGHT}..={MAX_GAME_WEIGHT}",
                        selection.game_id
                    ),
                ));
            }
            if !seen_games.insert(&selection.game_id) {
                errors.push(FieldError::new(
                    "games",
                    format!("duplicate game id {}", selection.game_id),
                ));
            }
        }

        if self.regions.is_empty() {
            errors.push(FieldError::new("regions", "at least one region is required"));
        }
        let mut seen_regions = HashSet::new();
        for region in &self.regions {
            if !seen_regions.insert(region) {
                errors.push(FieldError::new("regions", "duplicate region entry"));
            }
        }

        if self.languages.len() > MAX_LANGUAGES_PER_REQUEST {
            errors.push(FieldError::new(
                "languages",
                format!("at most {MAX_LANGUAGES_PER_REQUEST} languages may be listed"),
            ));
        }
        for language in &self.languages {
            let len = language.chars().count();
            if !(2..=5).contains(&len) {
                errors.push(FieldError::new(
                    "languages",
                    format!("language code '{language}' must be 2-5 characters"),
                ));
            }
        }
        if self.language_preference == PreferenceStrength::Strict && self.languages.is_empty() {
            errors.push(FieldError::new(
                "languagePreference",
                "strict language preference requires at least one language",
            ));
        }

        if self.group_size.min < 1 {
            errors.push(FieldError::new("groupSize", "minimum group size is 1"));
        }
        if self.group_size.max > MAX_GROUP_SIZE {
            errors.push(FieldError::new(
                "groupSize",
                format!("maximum group size is {MAX_GROUP_SIZE}"),
            ));
        }
        if self.group_size.min > self.group_size.max {
            errors.push(FieldError::new(
                "groupSize",
                "minimum must not exceed maximum",
            ));
        }

        if let Some(scheduled) = self.scheduled_time {
            if scheduled > now + Duration::days(MAX_SCHEDULE_AHEAD_DAYS) {
                errors.push(FieldError::new(
                    "scheduledTime",
                    format!("must be within {MAX_SCHEDULE_AHEAD_DAYS} days"),
                ));
            }
        }

        if self.preselected_users.contains(submitter) {
            errors.push(FieldError::new(
                "preselectedUsers",
                "must not include the submitting user",
            ));
        }
        if self.preselected_users.len() >= usize::from(MAX_GROUP_SIZE) {
            errors.push(FieldError::new(
                "preselectedUsers",
                "preselected list exceeds the largest possible group",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
