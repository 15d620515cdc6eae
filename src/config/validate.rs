//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use fancy_regex::Regex;

use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    // Discord
    if config.discord.token.is_empty() {
        errors.push("discord.token is required".to_string());
    }
    if config.discord.token == "YOUR_DISCORD_TOKEN_HERE" {
        errors.push("discord.token has not been configured (still using placeholder)".to_string());
    }
    if config.discord.prefix.trim().is_empty() {
        errors.push("discord.prefix must not be empty".to_string());
    }

    // Reactions
    let custom_emote = Regex::new(r"^<a?:\w{2,32}:\d{17,}>$").map_err(|e| {
        ConfigError::ValidationError {
            message: e.to_string(),
        }
    })?;
    for (key, value) in [
        ("emojis.success", &config.emojis.success),
        ("emojis.failure", &config.emojis.failure),
    ] {
        let is_custom = custom_emote.is_match(value).unwrap_or(false);
        if emojis::get(value).is_none() && !is_custom {
            errors.push(format!(
                "{} '{}' is neither a unicode emoji nor a custom emote",
                key, value
            ));
        }
    }

    // HTTP
    if config.http.head_timeout_secs == 0 {
        errors.push("http.head_timeout_secs must be non-zero".to_string());
    }
    if config.http.read_timeout_secs == 0 {
        errors.push("http.read_timeout_secs must be non-zero".to_string());
    }
    if config.http.user_agent.is_empty() {
        errors.push("http.user_agent is required".to_string());
    }
    if !config.http.api_base_url.starts_with("http://") && !config.http.api_base_url.starts_with("https://") {
        errors.push(format!(
            "http.api_base_url '{}' is not an http(s) URL",
            config.http.api_base_url
        ));
    }

    // Images
    if config.images.archive_size_limit == 0 {
        errors.push("images.archive_size_limit must be non-zero".to_string());
    }
    if config.images.shrink_timeout_secs == 0 {
        errors.push("images.shrink_timeout_secs must be non-zero".to_string());
    }
    if config.images.convert_timeout_secs == 0 {
        errors.push("images.convert_timeout_secs must be non-zero".to_string());
    }
    if config.images.worker_mode().is_none() {
        errors.push(format!(
            "images.worker_mode '{}' is invalid (use: process, thread)",
            config.images.worker_mode
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::*;

    fn make_valid_config() -> Config {
        Config {
            discord: DiscordConfig {
                token: "valid_token_here".to_string(),
                prefix: "em/".to_string(),
            },
            emojis: EmojisConfig::default(),
            http: HttpConfig::default(),
            images: ImagesConfig::default(),
            ec: EcConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        let config = make_valid_config();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_token_fails() {
        let mut config = make_valid_config();
        config.discord.token = String::new();

        let result = validate_config(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("discord.token"));
    }

    #[test]
    fn test_placeholder_token_fails() {
        let mut config = make_valid_config();
        config.discord.token = "YOUR_DISCORD_TOKEN_HERE".to_string();

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("placeholder"));
    }

    #[test]
    fn test_custom_emote_reaction_accepted() {
        let mut config = make_valid_config();
        config.emojis.success = "<:yes:400000000000000000>".to_string();
        config.emojis.failure = "<a:no:400000000000000001>".to_string();

        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_bad_reaction_fails() {
        let mut config = make_valid_config();
        config.emojis.failure = "nope".to_string();

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("emojis.failure"));
    }

    #[test]
    fn test_all_problems_reported_together() {
        let mut config = make_valid_config();
        config.http.read_timeout_secs = 0;
        config.images.archive_size_limit = 0;
        config.images.worker_mode = "fork".to_string();

        let message = validate_config(&config).unwrap_err().to_string();
        assert!(message.contains("http.read_timeout_secs"));
        assert!(message.contains("images.archive_size_limit"));
        assert!(message.contains("images.worker_mode 'fork'"));
    }
}
