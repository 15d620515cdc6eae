//! Discord bot integration.
//!
//! This module provides the prefix commands that drive emote management
//! from Discord messages.

pub mod client;
pub mod commands;
pub mod handler;
pub mod paginator;
pub mod parse;

// Re-export main types for external use
pub use client::{DiscordBot, DiscordBotBuilder};
pub use commands::{BotState, Command};
