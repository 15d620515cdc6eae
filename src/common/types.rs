//! Shared types used across the application.

use std::fmt;
use std::time::Duration;

/// Discord guild (server) snowflake.
pub type GuildId = u64;

/// Discord custom emoji snowflake.
pub type EmoteId = u64;

/// Platform hard ceiling for a single emote image.
pub const EMOTE_SIZE_LIMIT: usize = 256 * 1024;

/// Base URL of the emote CDN.
const EMOTE_CDN: &str = "https://cdn.discordapp.com/emojis";

/// How many emotes of each kind a guild currently holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmoteCounts {
    pub static_count: usize,
    pub animated_count: usize,
}

impl EmoteCounts {
    pub fn new(static_count: usize, animated_count: usize) -> Self {
        Self {
            static_count,
            animated_count,
        }
    }

    /// Count one more emote of the given kind.
    pub fn record(&mut self, animated: bool) {
        if animated {
            self.animated_count += 1;
        } else {
            self.static_count += 1;
        }
    }

    pub fn static_full(&self, limit: usize) -> bool {
        // >= because there are ways to exceed the limit
        self.static_count >= limit
    }

    pub fn animated_full(&self, limit: usize) -> bool {
        self.animated_count >= limit
    }
}

/// An emote as returned by the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedEmote {
    pub id: EmoteId,
    pub name: String,
    pub animated: bool,
}

impl CreatedEmote {
    pub fn url(&self) -> String {
        emote_url(self.id, self.animated)
    }
}

impl fmt::Display for CreatedEmote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.animated { "a" } else { "" };
        write!(f, "<{}:{}:{}>", prefix, self.name, self.id)
    }
}

/// CDN URL for an emote image.
pub fn emote_url(id: EmoteId, animated: bool) -> String {
    let extension = if animated { "gif" } else { "png" };
    format!("{}/{}.{}?v=1", EMOTE_CDN, id, extension)
}

/// Format a user for audit log purposes: `@name (id)`.
pub fn format_user(name: &str, id: u64) -> String {
    format!("@{} ({})", name, id)
}

/// Human readable byte count using decimal units.
pub fn natural_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["kB", "MB", "GB", "TB", "PB"];

    if bytes == 1 {
        return "1 Byte".to_string();
    }
    if bytes < 1000 {
        return format!("{} Bytes", bytes);
    }

    let mut value = bytes as f64 / 1000.0;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Rough human description of a wait, e.g. `a minute` or `3 hours`.
pub fn natural_delta(delta: Duration) -> String {
    let secs = delta.as_secs();
    let (count, singular, unit) = match secs {
        0 => return "a moment".to_string(),
        1..=59 => (secs, "a second", "seconds"),
        60..=3599 => (secs / 60, "a minute", "minutes"),
        3600..=86399 => (secs / 3600, "an hour", "hours"),
        _ => (secs / 86400, "a day", "days"),
    };
    if count == 1 {
        singular.to_string()
    } else {
        format!("{} {}", count, unit)
    }
}
