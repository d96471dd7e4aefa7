//! Configuration module.
//!
//! Layered loading: `config.json` (path overridable via `MATCHPOOL_CONFIG`)
//! -> environment overrides -> code defaults. Each concern gets its own
//! section module; `validation` gates security-sensitive settings before the
//! server starts.

pub mod catalog;
pub mod defaults;
pub mod loader;
pub mod lobby;
pub mod logging;
pub mod matchmaking;
pub mod notifications;
pub mod security;
pub mod server;
pub mod types;
pub mod validation;

pub use catalog::CatalogConfig;
pub use loader::load;
pub use lobby::LobbyConfig;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use matchmaking::MatchmakingConfig;
pub use notifications::NotificationsConfig;
pub use security::SecurityConfig;
pub use server::ServerConfig;
pub use types::Config;
pub use validation::{is_production_mode, validate_config_security};
