use serde::{Deserialize, Serialize};

use super::defaults;

/// Seed for the cached game-catalogue view. Catalogue ingestion from the
/// external games database happens out of process; this is the local cache
/// the server validates submissions against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub games: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            games: defaults::catalog_games(),
        }
    }
}
