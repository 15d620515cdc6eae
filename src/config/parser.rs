//! Configuration file parsing (HOCON format).

use std::path::Path;

use crate::common::error::ConfigError;
use crate::config::types::Config;
use hocon::HoconLoader;

/// Load configuration from a HOCON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    HoconLoader::new()
        .load_file(path)
        .map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: std::io::Error::other(e.to_string()),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

/// Load configuration from a HOCON string.
pub fn load_config_str(content: &str) -> Result<Config, ConfigError> {
    HoconLoader::new()
        .load_str(content)
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_config_str(r#"discord { token = "abc" }"#).unwrap();

        assert_eq!(config.discord.token, "abc");
        assert_eq!(config.discord.prefix, "em/");
        assert_eq!(config.emojis.success, "✅");
        assert_eq!(config.http.head_timeout_secs, 10);
        assert_eq!(config.http.read_timeout_secs, 60);
        assert_eq!(config.images.archive_size_limit, 50_000_000);
        assert_eq!(config.images.worker_mode, "process");
        assert!(config.ec.emotes_path.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = load_config_str(
            r#"
            discord {
                token = "abc"
                prefix = "!"
            }
            emojis {
                success = "👍"
                failure = "<:no:400000000000000000>"
            }
            http {
                head_timeout_secs = 3
                api_base_url = "http://localhost:8080/api"
            }
            images {
                archive_size_limit = 1000
                worker_mode = thread
            }
            ec {
                emotes_path = "ec.json"
            }
            "#,
        )
        .unwrap();

        assert_eq!(config.discord.prefix, "!");
        assert_eq!(config.emojis.failure, "<:no:400000000000000000>");
        assert_eq!(config.http.head_timeout_secs, 3);
        assert_eq!(config.http.read_timeout_secs, 60);
        assert_eq!(config.http.api_base_url, "http://localhost:8080/api");
        assert_eq!(config.images.archive_size_limit, 1000);
        assert_eq!(config.images.worker_mode, "thread");
        assert_eq!(config.ec.emotes_path.as_deref(), Some("ec.json"));
    }

    #[test]
    fn test_missing_token_is_parse_error() {
        assert!(matches!(
            load_config_str("discord { prefix = \"!\" }"),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_config("/nonexistent/emote-manager.conf"),
            Err(ConfigError::IoError { .. })
        ));
    }
}
