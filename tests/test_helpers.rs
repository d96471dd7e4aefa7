//! Shared helpers for integration tests.
#![allow(dead_code)]

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use matchpool_server::app::App;
use matchpool_server::config::Config;
use matchpool_server::domain::criteria::{
    GameMode, GameSelection, GroupSize, MatchCriteria, PreferenceStrength, Region, SkillPreference,
};
use matchpool_server::domain::types::{GameId, UserId};
use matchpool_server::domain::user::{User, UserRole, UserStatus};

pub const TEST_GAME: &str = "rocket-rumble";
pub const TEST_SECRET: &str = "integration-test-secret";

/// Configuration tuned for fast tests: 100 ms ticks, 150 ms auto-start.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.catalog.games = vec![TEST_GAME.to_string(), "void-tactics".to_string()];
    config.security.auth_secret = Some(TEST_SECRET.to_string());
    config.matchmaking.tick_interval_secs = 1;
    config.lobby.auto_start_delay_secs = 1;
    config
}

pub async fn test_app() -> Arc<App> {
    App::from_config(test_config())
        .await
        .expect("test app should build")
}

/// Seed an active user with a skill for the test game. Returns the id and a
/// valid bearer token.
pub async fn seed_player(app: &Arc<App>, name: &str, skill: u8, karma: u8) -> (UserId, String) {
    seed_user(app, name, skill, karma, UserRole::Player).await
}

pub async fn seed_user(
    app: &Arc<App>,
    name: &str,
    skill: u8,
    karma: u8,
    role: UserRole,
) -> (UserId, String) {
    let user = User {
        id: uuid::Uuid::new_v4(),
        display_name: name.to_string(),
        status: UserStatus::Active,
        role,
        karma,
        game_skills: HashMap::from([(TEST_GAME.to_string(), skill)]),
        notification_preferences: Default::default(),
        created_at: Utc::now(),
    };
    let id = user.id;
    app.storage
        .upsert_user(user)
        .await
        .expect("seeding a user should succeed");
    let token = app
        .verifier
        .issue(id, role, chrono::Duration::hours(1));
    (id, token)
}

/// Competitive 2-player NA criteria with similar-skill matching.
pub fn pair_criteria() -> MatchCriteria {
    MatchCriteria {
        games: vec![GameSelection {
            game_id: TEST_GAME.to_string(),
            weight: 7,
        }],
        game_mode: GameMode::Competitive,
        regions: vec![Region::Na],
        region_preference: PreferenceStrength::Preferred,
        languages: Vec::new(),
        language_preference: PreferenceStrength::Any,
        skill_preference: SkillPreference::Similar,
        group_size: GroupSize { min: 2, max: 2 },
        scheduled_time: None,
        preselected_users: Vec::new(),
    }
}

pub fn criteria_for_game(game: &str) -> MatchCriteria {
    let mut criteria = pair_criteria();
    criteria.games[0].game_id = GameId::from(game);
    criteria
}
