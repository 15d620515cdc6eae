//! Discord message handling.
//!
//! Picks commands out of incoming messages and runs each one on its own
//! task, reporting failures back to the channel.

use std::sync::Arc;

use serenity::model::channel::Message;
use serenity::prelude::*;
use tracing::{debug, error, info};

use crate::common::CommandError;
use crate::discord::commands::{react, BotState, Command, Invocation};
use crate::discord::parse::split_args;

/// A prefixed command found in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: Command,
    pub args: Vec<String>,
}

/// Parse `content` as a command, if it starts with `prefix` and names one.
pub fn parse_command(prefix: &str, content: &str) -> Option<ParsedCommand> {
    let rest = content.trim_start().strip_prefix(prefix)?;
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args),
        None => (rest, ""),
    };
    let command = Command::parse(name)?;

    Some(ParsedCommand {
        command,
        args: split_args(args),
    })
}

/// Command handler for the bot.
#[derive(Clone)]
pub struct CommandHandler {
    state: Arc<BotState>,
}

impl CommandHandler {
    pub fn new(state: Arc<BotState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<BotState> {
        &self.state
    }

    pub async fn handle_message(&self, ctx: Context, msg: Message) {
        // Ignore bots, ourselves included
        if msg.author.bot {
            return;
        }

        let Some(parsed) = parse_command(&self.state.prefix, &msg.content) else {
            return;
        };

        info!(
            "{} command from {} ({}) in channel {}",
            parsed.command, msg.author.name, msg.author.id, msg.channel_id
        );

        // Commands can wait on users for minutes; don't hold up the event loop.
        let state = self.state.clone();
        tokio::spawn(async move {
            let result = Invocation::run(parsed.command, &ctx, &msg, &state, parsed.args).await;
            if let Err(e) = result {
                report_failure(&ctx, &msg, &state, parsed.command, e).await;
            }
        });
    }
}

async fn report_failure(ctx: &Context, msg: &Message, state: &BotState, command: Command, e: CommandError) {
    let message = match &e {
        CommandError::User(message) => {
            debug!("{} rejected: {}", command, message);
            Some(message.clone())
        }
        CommandError::Emote(emote_error) => {
            debug!("{} failed: {}", command, emote_error);
            Some(state.ingestor.render_error("", emote_error))
        }
        CommandError::Discord(discord_error) => {
            error!("{} failed: {}", command, discord_error);
            None
        }
    };

    if let Some(message) = message {
        if let Err(e) = msg.channel_id.say(&ctx.http, message).await {
            error!("Failed to send error message: {}", e);
        }
    }
    react(ctx, msg, &state.ingestor.emojis().failure).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        let parsed = parse_command("em/", r#"em/rename blob "blob cat""#).unwrap();
        assert_eq!(parsed.command, Command::Rename);
        assert_eq!(parsed.args, vec!["blob".to_string(), "blob cat".to_string()]);

        let bare = parse_command("em/", "em/stats").unwrap();
        assert_eq!(bare.command, Command::Stats);
        assert!(bare.args.is_empty());
    }

    #[test]
    fn test_parse_command_ignores_other_messages() {
        assert!(parse_command("em/", "hello").is_none());
        assert!(parse_command("em/", "em/unknown thing").is_none());
        assert!(parse_command("em/", "!add cat").is_none());
        assert!(parse_command("em/", "em/ add cat").is_none());
    }

    #[test]
    fn test_parse_command_multiline_args() {
        let parsed = parse_command("!", "!add-these\n<:a:400000000000000001>").unwrap();
        assert_eq!(parsed.command, Command::AddThese);
        assert_eq!(parsed.args, vec!["<:a:400000000000000001>".to_string()]);
    }
}
