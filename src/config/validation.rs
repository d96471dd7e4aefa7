use super::types::Config;

/// Whether the process runs in production mode (`MATCHPOOL_ENV=production`).
pub fn is_production_mode() -> bool {
    std::env::var("MATCHPOOL_ENV")
        .map(|v| v.eq_ignore_ascii_case("production"))
        .unwrap_or(false)
}

/// Validate security-sensitive settings. In production mode problems are
/// hard errors; in development they come back as one combined message the
/// caller may choose to print and ignore.
pub fn validate_config_security(config: &Config) -> Result<(), String> {
    let mut problems = Vec::new();

    match &config.security.auth_secret {
        None => problems.push(
            "security.auth_secret is not set; bearer tokens cannot be verified across restarts"
                .to_string(),
        ),
        Some(secret) if secret.len() < 16 => {
            problems.push("security.auth_secret is shorter than 16 characters".to_string());
        }
        Some(_) => {}
    }

    if config.security.cors_origins == "*" && is_production_mode() {
        problems.push("security.cors_origins is \"*\" in production".to_string());
    }

    if config.matchmaking.tick_interval_secs == 0 {
        problems.push("matchmaking.tick_interval_secs must be at least 1".to_string());
    }
    if config.matchmaking.min_group_size == 0 {
        problems.push("matchmaking.min_group_size must be at least 1".to_string());
    }
    if config.notifications.queue_capacity == 0 {
        problems.push("notifications.queue_capacity must be at least 1".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else if is_production_mode() {
        Err(problems.join("\n"))
    } else {
        // Development keeps running; the loader prints these as warnings.
        match problems
            .iter()
            .find(|p| p.contains("must be at least"))
        {
            // Structural problems are errors even in development.
            Some(_) => Err(problems.join("\n")),
            None => {
                for problem in &problems {
                    tracing::warn!(problem = %problem, "config security warning");
                }
                Ok(())
            }
        }
    }
}
