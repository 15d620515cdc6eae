//! Error types for the application.

use thiserror::Error;
use tokio::time::Instant;

use crate::image::Operation;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Everything that can go wrong while ingesting or managing an emote.
///
/// These are typed failures. Turning them into text for Discord users is the
/// job of [`crate::emotes::Ingestor::render_error`], never of the code that
/// raises them.
#[derive(Debug, Error)]
pub enum EmoteError {
    #[error("image data is not a PNG, JPEG, GIF or WEBP file")]
    InvalidImage,

    #[error("not a valid zip or tar archive")]
    InvalidArchive,

    #[error("file is {size} bytes, limit is {limit} bytes")]
    FileTooBig { size: u64, limit: u64 },

    #[error("{operation} exceeded its deadline")]
    ProcessingTimeout { operation: Operation },

    #[error("rate limited until {retry_at:?}")]
    RateLimited { retry_at: Instant },

    #[error("remote API returned {status} {reason}: {detail}")]
    RemoteHttp {
        status: u16,
        reason: String,
        detail: String,
    },

    #[error("no static or animated emote slots left")]
    NoSlotsAvailable,

    #[error("timed out retrieving file")]
    FetchTimeout,

    #[error("invalid URL")]
    InvalidUrl,

    #[error("server returned status {0}")]
    FetchStatus(u16),

    #[error("unexpected content type")]
    InvalidFile,

    #[error("request failed: {0}")]
    Fetch(String),

    #[error("image worker exited with {code:?}: {stderr}")]
    WorkerFailed { code: Option<i32>, stderr: String },

    #[error("no emote called `{0}`")]
    EmoteNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EmoteError {
    /// Whether this failure belongs to the user's input rather than the bot.
    ///
    /// Batch operations keep going past these and stop on anything else.
    pub fn is_expected(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::WorkerFailed { .. })
    }
}

/// Result type alias for emote operations.
pub type EmoteResult<T> = std::result::Result<T, EmoteError>;

/// Why a bot command did not complete.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Shown to the invoker as is.
    #[error("{0}")]
    User(String),

    #[error(transparent)]
    Emote(#[from] EmoteError),

    #[error("Discord request failed: {0}")]
    Discord(#[from] serenity::Error),
}

impl CommandError {
    pub fn user(message: impl Into<String>) -> Self {
        Self::User(message.into())
    }
}

/// Result type alias for bot commands.
pub type CommandResult<T = ()> = std::result::Result<T, CommandError>;
