//! Default values shared by the config sections.

pub fn port() -> u16 {
    3650
}

pub fn shutdown_grace_secs() -> u64 {
    10
}

pub fn tick_interval_secs() -> u64 {
    5
}

pub fn min_group_size() -> usize {
    2
}

pub fn auto_start_delay_secs() -> u64 {
    5
}

pub fn history_window_hours() -> i64 {
    24
}

pub fn push_batch_size() -> usize {
    10
}

pub fn push_flush_secs() -> u64 {
    5
}

pub fn email_batch_size() -> usize {
    5
}

pub fn email_flush_secs() -> u64 {
    10
}

pub fn queue_capacity() -> usize {
    1024
}

pub fn sweep_days() -> i64 {
    30
}

pub fn cors_origins() -> String {
    "*".to_string()
}

pub fn log_dir() -> String {
    "logs".to_string()
}

pub fn log_filename() -> String {
    "server.log".to_string()
}

pub fn log_rotation() -> String {
    "daily".to_string()
}

pub fn catalog_games() -> Vec<String> {
    Vec::new()
}
