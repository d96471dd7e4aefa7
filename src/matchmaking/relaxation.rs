use chrono::Duration;

use crate::domain::criteria::{MatchCriteria, PreferenceStrength};

/// Relaxation level thresholds, measured from `search_start_time`.
pub const LEVEL_THRESHOLD_SECS: [i64; 3] = [30, 90, 180];

/// Skill radius per relaxation level.
pub const SKILL_RADII: [f64; 4] = [10.0, 20.0, 35.0, 60.0];

/// Terminal relaxation level.
pub const MAX_LEVEL: u8 = 3;

/// Level a request qualifies for after waiting `wait`.
///
/// Boundaries are inclusive: at exactly 30.0 s the level advances to 1.
pub fn level_for_wait(wait: Duration) -> u8 {
    let millis = wait.num_milliseconds();
    if millis >= LEVEL_THRESHOLD_SECS[2] * 1_000 {
        3
    } else if millis >= LEVEL_THRESHOLD_SECS[1] * 1_000 {
        2
    } else if millis >= LEVEL_THRESHOLD_SECS[0] * 1_000 {
        1
    } else {
        0
    }
}

pub fn skill_radius(level: u8) -> f64 {
    SKILL_RADII[usize::from(level.min(MAX_LEVEL))]
}

/// The widened view of a request's criteria at a given level. The stored
/// criteria are never mutated; this is derived at enrichment time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectivePreferences {
    pub region: PreferenceStrength,
    pub language: PreferenceStrength,
    pub skill_radius: f64,
}

/// Widen a declared preference by level: level 1 softens strict to
/// preferred, level 2 and beyond soften everything to any.
fn widen(declared: PreferenceStrength, level: u8) -> PreferenceStrength {
    match level {
        0 => declared,
        1 => match declared {
            PreferenceStrength::Strict => PreferenceStrength::Preferred,
            other => other,
        },
        _ => PreferenceStrength::Any,
    }
}

pub fn effective_preferences(criteria: &MatchCriteria, level: u8) -> EffectivePreferences {
    let level = level.min(MAX_LEVEL);
    EffectivePreferences {
        region: widen(criteria.region_preference, level),
        language: widen(criteria.language_preference, level),
        skill_radius: skill_radius(level),
    }
}
