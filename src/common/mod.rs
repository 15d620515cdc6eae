//! Common utilities and types shared across the application.

pub mod error;
pub mod types;

pub use error::{CommandError, CommandResult, ConfigError, EmoteError, EmoteResult};
pub use types::{CreatedEmote, EmoteCounts, EmoteId, GuildId, EMOTE_SIZE_LIMIT};
