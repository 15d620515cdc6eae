//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `EMOTE_MANAGER_DISCORD_TOKEN` - Discord bot token
//! - `EMOTE_MANAGER_PREFIX` - Command prefix
//! - `EMOTE_MANAGER_WORKER_PATH` - Image worker executable

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "EMOTE_MANAGER";

/// Apply environment variable overrides to a config.
///
/// This allows the token to be provided via the environment instead of the
/// config file.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(token) = env::var(format!("{}_DISCORD_TOKEN", ENV_PREFIX)) {
        config.discord.token = token;
    }
    if let Ok(prefix) = env::var(format!("{}_PREFIX", ENV_PREFIX)) {
        config.discord.prefix = prefix;
    }
    if let Ok(path) = env::var(format!("{}_WORKER_PATH", ENV_PREFIX)) {
        config.images.worker_path = Some(path);
    }

    config
}

/// Check if any required environment variables are set but empty.
///
/// Returns a list of variable names that are set but empty.
pub fn check_empty_env_vars() -> Vec<String> {
    let vars = [
        format!("{}_DISCORD_TOKEN", ENV_PREFIX),
        format!("{}_PREFIX", ENV_PREFIX),
    ];

    vars.into_iter()
        .filter(|var| env::var(var).map(|v| v.is_empty()).unwrap_or(false))
        .collect()
}

/// Get the config file path from environment or use default.
///
/// Checks `EMOTE_MANAGER_CONFIG`, otherwise returns "emote-manager.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX))
        .unwrap_or_else(|_| "emote-manager.conf".to_string())
}
