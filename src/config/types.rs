//! Configuration type definitions.

use std::time::Duration;

use serde::Deserialize;

use crate::emotes::client::DEFAULT_API_BASE_URL;
use crate::emotes::{IngestSettings, StatusEmojis};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    #[serde(default)]
    pub emojis: EmojisConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub ec: EcConfig,
}

impl Config {
    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            shrink_timeout: Duration::from_secs(self.images.shrink_timeout_secs),
            convert_timeout: Duration::from_secs(self.images.convert_timeout_secs),
            archive_size_limit: self.images.archive_size_limit,
            command_prefix: self.discord.prefix.clone(),
        }
    }

    pub fn status_emojis(&self) -> StatusEmojis {
        StatusEmojis {
            success: self.emojis.success.clone(),
            failure: self.emojis.failure.clone(),
        }
    }
}

/// Discord bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub token: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "em/".to_string()
}

/// Reactions for command success and failure.
///
/// Each is a unicode emoji or a custom emote mention like `<:yes:1234...>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmojisConfig {
    pub success: String,
    pub failure: String,
}

impl Default for EmojisConfig {
    fn default() -> Self {
        let defaults = StatusEmojis::default();
        Self {
            success: defaults.success,
            failure: defaults.failure,
        }
    }
}

/// Outgoing HTTP settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    /// Timeout for the HEAD request that vets a URL before downloading it.
    pub head_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub api_base_url: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!(
                "EmoteManagerBot/{} (https://github.com/iomintz/emote-manager-bot)",
                env!("CARGO_PKG_VERSION")
            ),
            head_timeout_secs: 10,
            read_timeout_secs: 60,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

impl HttpConfig {
    pub fn head_timeout(&self) -> Duration {
        Duration::from_secs(self.head_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Where image transforms run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// A child process per job, killed on timeout.
    Process,
    /// Tokio's blocking pool.
    Thread,
}

impl WorkerMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "process" | "subprocess" => Some(Self::Process),
            "thread" => Some(Self::Thread),
            _ => None,
        }
    }
}

/// Image processing limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    /// Largest archive member that will be extracted, in bytes.
    pub archive_size_limit: u64,
    pub shrink_timeout_secs: u64,
    pub convert_timeout_secs: u64,
    /// "process" or "thread".
    pub worker_mode: String,
    /// Worker executable. Defaults to this binary.
    pub worker_path: Option<String>,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            archive_size_limit: 50_000_000,
            shrink_timeout_secs: 30,
            convert_timeout_secs: 30,
            worker_mode: "process".to_string(),
            worker_path: None,
        }
    }
}

impl ImagesConfig {
    pub fn worker_mode(&self) -> Option<WorkerMode> {
        WorkerMode::parse(&self.worker_mode)
    }
}

/// Emote Collector database.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EcConfig {
    /// JSON file of collected emotes. `add-from-ec` is disabled without it.
    pub emotes_path: Option<String>,
}
