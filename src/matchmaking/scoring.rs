use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::domain::criteria::{
    GameMode, GroupSize, PreferenceStrength, Region, SkillPreference,
};
use crate::domain::types::{RequestId, UserId};

use super::relaxation::EffectivePreferences;

/// A pair below this score never ends up in the same group.
pub const MIN_PAIR_SCORE: f64 = 50.0;

/// Wait that earns the full wait-time bonus.
const FULL_WAIT_BONUS_SECS: f64 = 180.0;

// Dimension weights; they sum to 100.
const WEIGHT_REGION: f64 = 30.0;
const WEIGHT_LANGUAGE: f64 = 15.0;
const WEIGHT_SKILL: f64 = 25.0;
const WEIGHT_GROUP_SIZE: f64 = 10.0;
const WEIGHT_KARMA: f64 = 10.0;
const WEIGHT_WAIT: f64 = 10.0;

/// A request joined with everything the scorer needs about its owner.
///
/// Built by the coordinator's enrichment step so scoring stays pure and
/// testable without a store. Preferences are the *effective* (relaxed) view.
#[derive(Debug, Clone)]
pub struct EnrichedRequest {
    pub request_id: RequestId,
    pub user_id: UserId,
    pub game_mode: GameMode,
    pub regions: Vec<Region>,
    pub languages: Vec<String>,
    pub effective: EffectivePreferences,
    pub skill_preference: SkillPreference,
    /// Owner's skill for the bucket game, 0-100.
    pub skill_level: f64,
    /// Owner's karma, 0-100.
    pub karma: f64,
    pub group_size: GroupSize,
    pub search_start_time: DateTime<Utc>,
    pub preselected_users: Vec<UserId>,
}

impl EnrichedRequest {
    fn wait_secs(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.search_start_time).num_milliseconds().max(0) as f64) / 1_000.0
    }

    fn has_any_region(&self) -> bool {
        self.regions.contains(&Region::Any)
    }
}

fn region_overlap(a: &EnrichedRequest, b: &EnrichedRequest) -> usize {
    let set: HashSet<&Region> = a.regions.iter().collect();
    b.regions.iter().filter(|r| set.contains(r)).count()
}

fn language_overlap(a: &EnrichedRequest, b: &EnrichedRequest) -> usize {
    let set: HashSet<&String> = a.languages.iter().collect();
    b.languages.iter().filter(|l| set.contains(l)).count()
}

/// Score an ordered pair of enriched requests in [0, 100].
///
/// `None` means the pair is not comparable at all (game-mode gate). A `Some`
/// score of zero still means "never match": mandatory constraints (strict
/// region/language with no overlap) zero the whole pair rather than one
/// dimension, matching the hard-gate semantics.
pub fn pair_score(a: &EnrichedRequest, b: &EnrichedRequest, now: DateTime<Utc>) -> Option<f64> {
    if a.game_mode != b.game_mode {
        return None;
    }

    let overlap = region_overlap(a, b);
    let any_region = a.has_any_region() || b.has_any_region();
    let strict_region = a.effective.region == PreferenceStrength::Strict
        || b.effective.region == PreferenceStrength::Strict;
    if strict_region && overlap == 0 && !any_region {
        return Some(0.0);
    }
    let region_points = if any_region {
        WEIGHT_REGION
    } else {
        let denominator = a.regions.len().min(b.regions.len()).max(1);
        WEIGHT_REGION * (overlap as f64 / denominator as f64)
    };

    let lang_overlap = language_overlap(a, b);
    let lang_unconstrained = a.languages.is_empty() || b.languages.is_empty();
    let strict_language = a.effective.language == PreferenceStrength::Strict
        || b.effective.language == PreferenceStrength::Strict;
    if strict_language && lang_overlap == 0 && !lang_unconstrained {
        return Some(0.0);
    }
    let language_points = if lang_unconstrained {
        WEIGHT_LANGUAGE
    } else {
        let denominator = a.languages.len().min(b.languages.len()).max(1);
        WEIGHT_LANGUAGE * (lang_overlap as f64 / denominator as f64)
    };

    let skill_points = match (a.skill_preference, b.skill_preference) {
        (SkillPreference::Any, SkillPreference::Any) => WEIGHT_SKILL,
        _ => {
            // The side that asked for similar skill constrains the pair; with
            // both asking, the tighter radius wins.
            let radius = match (a.skill_preference, b.skill_preference) {
                (SkillPreference::Similar, SkillPreference::Similar) => {
                    a.effective.skill_radius.min(b.effective.skill_radius)
                }
                (SkillPreference::Similar, SkillPreference::Any) => a.effective.skill_radius,
                _ => b.effective.skill_radius,
            };
            let proximity = (1.0 - (a.skill_level - b.skill_level).abs() / radius).max(0.0);
            if proximity <= 0.0 {
                // A gap beyond the (possibly relaxed) radius is a hard gate
                // for anyone who asked for similar skill, not a 25-point
                // deduction.
                return Some(0.0);
            }
            WEIGHT_SKILL * proximity
        }
    };

    let size_points = if a.group_size.intersect(&b.group_size).is_some() {
        WEIGHT_GROUP_SIZE
    } else {
        0.0
    };

    let karma_points = WEIGHT_KARMA * ((a.karma + b.karma) / 2.0 / 100.0);

    let wait_a = (a.wait_secs(now) / FULL_WAIT_BONUS_SECS).min(1.0);
    let wait_b = (b.wait_secs(now) / FULL_WAIT_BONUS_SECS).min(1.0);
    let wait_points = WEIGHT_WAIT * ((wait_a + wait_b) / 2.0);

    let total =
        region_points + language_points + skill_points + size_points + karma_points + wait_points;
    Some(total.clamp(0.0, 100.0))
}

/// Group-level score: the mean over all unordered pairs, in [0, 100].
/// Single-member groups score from their own dimensions (full region and
/// language weight, their own karma and wait).
pub fn group_score(members: &[EnrichedRequest], now: DateTime<Utc>) -> f64 {
    match members.len() {
        0 => 0.0,
        1 => {
            let only = &members[0];
            let karma_points = WEIGHT_KARMA * (only.karma / 100.0);
            let wait_points =
                WEIGHT_WAIT * (only.wait_secs(now) / FULL_WAIT_BONUS_SECS).min(1.0);
            (WEIGHT_REGION
                + WEIGHT_LANGUAGE
                + WEIGHT_SKILL
                + WEIGHT_GROUP_SIZE
                + karma_points
                + wait_points)
                .clamp(0.0, 100.0)
        }
        _ => {
            let mut total = 0.0;
            let mut pairs = 0usize;
            for i in 0..members.len() {
                for j in (i + 1)..members.len() {
                    total += pair_score(&members[i], &members[j], now).unwrap_or(0.0);
                    pairs += 1;
                }
            }
            (total / pairs as f64).clamp(0.0, 100.0)
        }
    }
}

/// Tie-break order between equally scored candidates: longer wait first,
/// then stable id order.
pub fn candidate_order(a: &EnrichedRequest, b: &EnrichedRequest) -> std::cmp::Ordering {
    a.search_start_time
        .cmp(&b.search_start_time)
        .then_with(|| a.request_id.cmp(&b.request_id))
}
