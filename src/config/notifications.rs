use serde::{Deserialize, Serialize};

use super::defaults;

/// Delivery batching and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub push_batch_size: usize,
    pub push_flush_secs: u64,
    pub email_batch_size: usize,
    pub email_flush_secs: u64,
    /// Capacity of each dispatch queue; enqueue waits when full.
    pub queue_capacity: usize,
    /// Read/archived notifications older than this are swept.
    pub sweep_days: i64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            push_batch_size: defaults::push_batch_size(),
            push_flush_secs: defaults::push_flush_secs(),
            email_batch_size: defaults::email_batch_size(),
            email_flush_secs: defaults::email_flush_secs(),
            queue_capacity: defaults::queue_capacity(),
            sweep_days: defaults::sweep_days(),
        }
    }
}
