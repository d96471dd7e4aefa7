use std::path::Path;

use super::types::Config;
use super::validation::validate_config_security;

/// Environment variable naming the config file.
const CONFIG_PATH_VAR: &str = "MATCHPOOL_CONFIG";
/// Default config file name, looked up in the working directory.
const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Load configuration: `config.json` if present, then env overrides, then
/// code defaults for everything unspecified. Security validation problems
/// are reported to stderr here but only fail startup in the binary, which
/// re-runs validation with proper error handling.
pub fn load() -> Config {
    let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = read_file(Path::new(&path));
    apply_env_overrides(&mut config);

    if let Err(err) = validate_config_security(&config) {
        eprintln!("Configuration security warnings:\n{err}");
    }
    config
}

fn read_file(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(err) => {
                eprintln!(
                    "Failed to parse {}: {err}; falling back to defaults",
                    path.display()
                );
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(port) = std::env::var("MATCHPOOL_PORT") {
        match port.parse() {
            Ok(port) => config.port = port,
            Err(_) => eprintln!("Ignoring invalid MATCHPOOL_PORT value"),
        }
    }
    if let Ok(secret) = std::env::var("MATCHPOOL_AUTH_SECRET") {
        if !secret.is_empty() {
            config.security.auth_secret = Some(secret);
        }
    }
    if let Ok(origins) = std::env::var("MATCHPOOL_CORS_ORIGINS") {
        if !origins.is_empty() {
            config.security.cors_origins = origins;
        }
    }
}
