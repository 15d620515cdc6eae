//! Per-guild rate limit bookkeeping for the emote API.
//!
//! The remote API limits emote routes per guild and per method. When it
//! answers 429 the retry time is stored here, and every later request for the
//! same guild and verb is refused locally until that time has passed. This
//! lets callers bail out before downloading or transcoding anything.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::common::{EmoteError, EmoteResult, GuildId};

/// Group of API routes that share a rate limit bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerbClass {
    Create,
    Delete,
    Modify,
}

impl fmt::Display for VerbClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Modify => "modify",
        };
        f.write_str(name)
    }
}

/// Retry times for one guild. Past entries are stale and treated as absent.
#[derive(Debug, Default)]
struct GuildRateState {
    retry_at: HashMap<VerbClass, Instant>,
}

#[derive(Debug, Default)]
pub struct GuildRateLimiter {
    guilds: Mutex<HashMap<GuildId, GuildRateState>>,
}

impl GuildRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`EmoteError::RateLimited`] if `verb` is still limited for `guild`.
    pub fn check_allowed(&self, guild: GuildId, verb: VerbClass) -> EmoteResult<()> {
        let mut guilds = self.guilds.lock();
        let Some(state) = guilds.get_mut(&guild) else {
            return Ok(());
        };
        let Some(&retry_at) = state.retry_at.get(&verb) else {
            return Ok(());
        };

        if retry_at > Instant::now() {
            return Err(EmoteError::RateLimited { retry_at });
        }

        state.retry_at.remove(&verb);
        if state.retry_at.is_empty() {
            guilds.remove(&guild);
        }
        Ok(())
    }

    /// Remember that `verb` may not be used on `guild` for `retry_after`.
    pub fn record_limited(&self, guild: GuildId, verb: VerbClass, retry_after: Duration) -> Instant {
        let retry_at = Instant::now() + retry_after;
        debug!(
            "guild {} rate limited on {} for {:?}",
            guild, verb, retry_after
        );
        self.guilds
            .lock()
            .entry(guild)
            .or_default()
            .retry_at
            .insert(verb, retry_at);
        retry_at
    }

    #[cfg(test)]
    fn is_tracked(&self, guild: GuildId) -> bool {
        self.guilds.lock().contains_key(&guild)
    }
}
