use serde::{Deserialize, Serialize};

use super::defaults;

/// Authentication and CORS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Shared secret for bearer-token verification. Required in production;
    /// a development fallback is generated when absent.
    pub auth_secret: Option<String>,
    /// Comma-separated allowed origins, or "*".
    pub cors_origins: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            auth_secret: None,
            cors_origins: defaults::cors_origins(),
        }
    }
}
