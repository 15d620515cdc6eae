//! Reaction driven paging for long listings.
//!
//! Every running paginator holds a [`Session`] from the bot's
//! [`SessionRegistry`], which closes them all on shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serenity::builder::{CreateEmbed, CreateEmbedFooter, CreateMessage, EditMessage};
use serenity::collector::ReactionCollector;
use serenity::model::channel::ReactionType;
use serenity::model::id::{ChannelId, UserId};
use serenity::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Entries on one page.
pub const PER_PAGE: usize = 10;

/// How long to wait for the next reaction before closing.
pub const PAGINATOR_TIMEOUT: Duration = Duration::from_secs(300);

const FIRST: &str = "⏮";
const PREVIOUS: &str = "◀";
const NEXT: &str = "▶";
const LAST: &str = "⏭";
const STOP: &str = "⏹";

const BUTTONS: [&str; 5] = [FIRST, PREVIOUS, NEXT, LAST, STOP];

/// Tracks open paginators so they can be closed together.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    root: CancellationToken,
    active: Arc<AtomicUsize>,
}

/// A registered paginator. Dropping it unregisters.
#[derive(Debug)]
pub struct Session {
    token: CancellationToken,
    active: Arc<AtomicUsize>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> Session {
        self.active.fetch_add(1, Ordering::SeqCst);
        Session {
            token: self.root.child_token(),
            active: self.active.clone(),
        }
    }

    /// Close every open session. Sessions registered afterwards start closed.
    pub fn close_all(&self) {
        debug!("closing {} paginator sessions", self.active());
        self.root.cancel();
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Session {
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Navigation {
    First,
    Previous,
    Next,
    Last,
    Stop,
}

impl Navigation {
    fn from_reaction(emoji: &ReactionType) -> Option<Self> {
        let ReactionType::Unicode(emoji) = emoji else {
            return None;
        };
        // Some clients send the variation selector, others don't.
        match emoji.trim_end_matches('\u{fe0f}') {
            FIRST => Some(Self::First),
            PREVIOUS => Some(Self::Previous),
            NEXT => Some(Self::Next),
            LAST => Some(Self::Last),
            STOP => Some(Self::Stop),
            _ => None,
        }
    }
}

/// A numbered list shown one page at a time.
#[derive(Debug, Clone)]
pub struct Paginator {
    pages: Vec<String>,
    entries: usize,
    page: usize,
}

impl Paginator {
    /// Number the lines from 1 and split them into pages.
    pub fn from_lines(lines: &[String], per_page: usize) -> Self {
        let per_page = per_page.max(1);
        let mut pages: Vec<String> = lines
            .chunks(per_page)
            .enumerate()
            .map(|(chunk, lines)| {
                lines
                    .iter()
                    .enumerate()
                    .map(|(i, line)| format!("{}. {}", chunk * per_page + i + 1, line))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect();
        if pages.is_empty() {
            pages.push(String::new());
        }

        Self {
            pages,
            entries: lines.len(),
            page: 0,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn current(&self) -> &str {
        &self.pages[self.page]
    }

    fn footer(&self) -> String {
        format!(
            "Page {} of {} ({} entries)",
            self.page + 1,
            self.pages.len(),
            self.entries
        )
    }

    fn embed(&self) -> CreateEmbed {
        CreateEmbed::new()
            .description(self.current())
            .footer(CreateEmbedFooter::new(self.footer()))
    }

    /// Move between pages, wrapping at both ends. Returns false on stop.
    fn navigate(&mut self, navigation: Navigation) -> bool {
        let last = self.pages.len() - 1;
        self.page = match navigation {
            Navigation::First => 0,
            Navigation::Previous if self.page == 0 => last,
            Navigation::Previous => self.page - 1,
            Navigation::Next if self.page == last => 0,
            Navigation::Next => self.page + 1,
            Navigation::Last => last,
            Navigation::Stop => return false,
        };
        true
    }

    /// Show the first page and follow `author`'s reactions until they stop,
    /// go quiet, or the session is closed.
    pub async fn run(
        mut self,
        ctx: &Context,
        channel: ChannelId,
        author: UserId,
        session: Session,
    ) -> serenity::Result<()> {
        let mut message = channel
            .send_message(&ctx.http, CreateMessage::new().embed(self.embed()))
            .await?;

        if self.page_count() == 1 {
            return Ok(());
        }

        for button in BUTTONS {
            if session.is_closed() {
                break;
            }
            message
                .react(&ctx.http, ReactionType::Unicode(button.to_string()))
                .await?;
        }

        loop {
            let collector = ReactionCollector::new(&ctx.shard)
                .message_id(message.id)
                .author_id(author)
                .timeout(PAGINATOR_TIMEOUT);

            let reaction = tokio::select! {
                reaction = collector.next() => reaction,
                _ = session.closed() => None,
            };
            let Some(reaction) = reaction else {
                break;
            };
            let Some(navigation) = Navigation::from_reaction(&reaction.emoji) else {
                continue;
            };
            if !self.navigate(navigation) {
                break;
            }

            message
                .edit(ctx, EditMessage::new().embed(self.embed()))
                .await?;
            tokio::time::sleep(Duration::from_millis(200)).await;
            reaction.delete(ctx).await.ok();
        }

        debug!("paginator on message {} closed", message.id);
        message.delete_reactions(ctx).await.ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("emote{}", i)).collect()
    }

    #[test]
    fn test_pages_are_numbered_across_pages() {
        let paginator = Paginator::from_lines(&lines(23), PER_PAGE);

        assert_eq!(paginator.page_count(), 3);
        assert!(paginator.current().starts_with("1. emote0\n2. emote1"));
        assert!(paginator.pages[1].starts_with("11. emote10"));
        assert_eq!(paginator.pages[2], "21. emote20\n22. emote21\n23. emote22");
        assert_eq!(paginator.footer(), "Page 1 of 3 (23 entries)");
    }

    #[test]
    fn test_empty_listing_has_one_page() {
        let paginator = Paginator::from_lines(&[], PER_PAGE);

        assert_eq!(paginator.page_count(), 1);
        assert_eq!(paginator.current(), "");
        assert_eq!(paginator.footer(), "Page 1 of 1 (0 entries)");
    }

    #[test]
    fn test_navigation_wraps() {
        let mut paginator = Paginator::from_lines(&lines(25), PER_PAGE);

        assert!(paginator.navigate(Navigation::Previous));
        assert_eq!(paginator.page, 2);
        assert!(paginator.navigate(Navigation::Next));
        assert_eq!(paginator.page, 0);
        assert!(paginator.navigate(Navigation::Last));
        assert_eq!(paginator.page, 2);
        assert!(paginator.navigate(Navigation::First));
        assert_eq!(paginator.page, 0);
        assert!(!paginator.navigate(Navigation::Stop));
    }

    #[test]
    fn test_navigation_from_reaction() {
        assert_eq!(
            Navigation::from_reaction(&ReactionType::Unicode("▶".to_string())),
            Some(Navigation::Next)
        );
        assert_eq!(
            Navigation::from_reaction(&ReactionType::Unicode("⏹\u{fe0f}".to_string())),
            Some(Navigation::Stop)
        );
        assert_eq!(
            Navigation::from_reaction(&ReactionType::Unicode("👍".to_string())),
            None
        );
    }

    #[tokio::test]
    async fn test_close_all_cancels_sessions() {
        let registry = SessionRegistry::new();
        let first = registry.register();
        let second = registry.register();
        assert_eq!(registry.active(), 2);
        assert!(!first.is_closed());

        registry.close_all();
        first.closed().await;
        assert!(second.is_closed());

        drop(first);
        drop(second);
        assert_eq!(registry.active(), 0);

        assert!(registry.register().is_closed());
    }
}
