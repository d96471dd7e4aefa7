use serde::{Deserialize, Serialize};

use super::defaults;

/// Queue-processor tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    /// Seconds between processor ticks.
    pub tick_interval_secs: u64,
    /// Buckets smaller than this are skipped by the tick.
    pub min_group_size: usize,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: defaults::tick_interval_secs(),
            min_group_size: defaults::min_group_size(),
        }
    }
}
