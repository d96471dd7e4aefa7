use serde::{Deserialize, Serialize};

use super::catalog::CatalogConfig;
use super::defaults;
use super::lobby::LobbyConfig;
use super::logging::LoggingConfig;
use super::matchmaking::MatchmakingConfig;
use super::notifications::NotificationsConfig;
use super::security::SecurityConfig;
use super::server::ServerConfig;

/// Root configuration, loadable from `config.json` with env overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub server: ServerConfig,
    pub matchmaking: MatchmakingConfig,
    pub lobby: LobbyConfig,
    pub notifications: NotificationsConfig,
    pub catalog: CatalogConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: defaults::port(),
            server: ServerConfig::default(),
            matchmaking: MatchmakingConfig::default(),
            lobby: LobbyConfig::default(),
            notifications: NotificationsConfig::default(),
            catalog: CatalogConfig::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
