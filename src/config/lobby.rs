use serde::{Deserialize, Serialize};

use super::defaults;

/// Lobby lifecycle tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    /// Seconds between a lobby turning ready and its automatic start.
    pub auto_start_delay_secs: u64,
    /// Hours a closed lobby stays visible in history listings.
    pub history_window_hours: i64,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            auto_start_delay_secs: defaults::auto_start_delay_secs(),
            history_window_hours: defaults::history_window_hours(),
        }
    }
}
