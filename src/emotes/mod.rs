//! Emote management: talking to the emote API and the ingestion pipeline.

pub mod client;
pub mod ec;
pub mod export;
pub mod fetch;
pub mod orchestrator;
pub mod ratelimit;

pub use client::EmoteClient;
pub use ec::{EcEmote, EmoteCollector};
pub use export::{export_emotes, Export, ExportEmote};
pub use fetch::{Fetcher, ARCHIVE_MIMETYPES, IMAGE_MIMETYPES};
pub use orchestrator::{
    emote_name_from_path, escape_mentions, AddOutcome, GuildSlots, ImageSource, IngestSettings,
    Ingestor, StatusEmojis,
};
pub use ratelimit::{GuildRateLimiter, VerbClass};
