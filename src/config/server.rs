use serde::{Deserialize, Serialize};

use super::defaults;

/// Process-level behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Seconds the graceful shutdown waits for in-flight work.
    pub shutdown_grace_secs: u64,
    /// Seed a couple of demo users at startup (development only; user
    /// provisioning is owned by the identity service in production).
    pub seed_demo_data: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: defaults::shutdown_grace_secs(),
            seed_demo_data: false,
        }
    }
}
