//! Emote management commands (`add`, `remove`, `list`, ...).
//!
//! Every invocation works on a snapshot of the guild fetched from the API
//! when the command starts. Changes the command makes are applied to that
//! snapshot directly, so later steps of the same command see them.

use std::fmt;
use std::time::Duration;

use futures::StreamExt;
use serenity::builder::{CreateAttachment, CreateMessage};
use serenity::collector::MessageCollector;
use serenity::model::channel::{Message, ReactionType};
use serenity::model::guild::{PartialGuild, PremiumTier};
use serenity::model::id::{RoleId, UserId};
use serenity::model::Permissions;
use serenity::prelude::*;
use tracing::{debug, info, warn};

use crate::common::types::format_user;
use crate::common::{CommandError, CommandResult, CreatedEmote, EmoteCounts, EmoteError};
use crate::emotes::{
    export_emotes, EmoteCollector, ExportEmote, GuildSlots, ImageSource, Ingestor,
    ARCHIVE_MIMETYPES,
};

use super::paginator::{Paginator, SessionRegistry, PER_PAGE};
use super::parse::{parse_add_args, strip_angle_brackets, EmoteFilter, EmoteSyntax};

/// How long to wait for an answer to "which one do you mean?".
pub const DISAMBIGUATION_TIMEOUT: Duration = Duration::from_secs(30);

const MIB: u64 = 1024 * 1024;

const PERMISSION_DENIED: &str = "Sorry, you don't have enough permissions to run this command. \
     You and I both need the Manage Expressions permission.";

/// Everything commands share.
pub struct BotState {
    pub ingestor: Ingestor,
    /// Emote Collector database, if one is configured.
    pub ec: Option<EmoteCollector>,
    pub sessions: SessionRegistry,
    pub syntax: EmoteSyntax,
    pub prefix: String,
}

impl BotState {
    pub fn new(ingestor: Ingestor, ec: Option<EmoteCollector>, prefix: impl Into<String>) -> Self {
        Self {
            ingestor,
            ec,
            sessions: SessionRegistry::new(),
            syntax: EmoteSyntax::new(),
            prefix: prefix.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add,
    AddThese,
    AddFromEc,
    Import,
    Export,
    Remove,
    Rename,
    List,
    Stats,
    Big,
}

impl Command {
    /// Look up a command by name or alias.
    pub fn parse(name: &str) -> Option<Self> {
        let command = match name.to_lowercase().as_str() {
            "add" => Self::Add,
            "add-these" => Self::AddThese,
            "add-from-ec" | "addfromec" => Self::AddFromEc,
            "import" | "add-zip" | "add-tar" | "add-from-zip" | "add-from-tar" => Self::Import,
            "export" => Self::Export,
            "remove" | "delete" | "delet" | "rm" => Self::Remove,
            "rename" | "mv" => Self::Rename,
            "list" | "ls" | "dir" => Self::List,
            "stats" | "status" => Self::Stats,
            "big" | "embiggen" => Self::Big,
            _ => return None,
        };
        Some(command)
    }

    /// Commands anyone may run. The rest need permission to manage emotes.
    pub fn is_public(&self) -> bool {
        matches!(self, Self::List | Self::Stats | Self::Export | Self::Big)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::AddThese => "add-these",
            Self::AddFromEc => "add-from-ec",
            Self::Import => "import",
            Self::Export => "export",
            Self::Remove => "remove",
            Self::Rename => "rename",
            Self::List => "list",
            Self::Stats => "stats",
            Self::Big => "big",
        };
        f.write_str(name)
    }
}

/// Emote slots per kind for a guild's boost tier.
pub fn emote_limit(tier: PremiumTier) -> usize {
    match tier {
        PremiumTier::Tier1 => 100,
        PremiumTier::Tier2 => 150,
        PremiumTier::Tier3 => 250,
        _ => 50,
    }
}

/// Largest file members can upload, by boost tier.
pub fn filesize_limit(tier: PremiumTier) -> u64 {
    match tier {
        PremiumTier::Tier2 => 50 * MIB,
        PremiumTier::Tier3 => 100 * MIB,
        _ => 25 * MIB,
    }
}

/// Guild level permissions of a member.
///
/// The owner and administrators get everything.
pub fn effective_permissions(
    owner: UserId,
    user: UserId,
    everyone: Permissions,
    roles: impl IntoIterator<Item = Permissions>,
) -> Permissions {
    if owner == user {
        return Permissions::all();
    }
    let permissions = roles.into_iter().fold(everyone, |all, role| all | role);
    if permissions.contains(Permissions::ADMINISTRATOR) {
        Permissions::all()
    } else {
        permissions
    }
}

/// Emotes whose name matches `name`, ignoring case and surrounding colons.
pub fn find_candidates(emotes: &[CreatedEmote], name: &str) -> Vec<CreatedEmote> {
    let name = name.trim_matches(':').to_lowercase();
    emotes
        .iter()
        .filter(|emote| emote.name.to_lowercase() == name)
        .cloned()
        .collect()
}

pub fn disambiguation_prompt(candidates: &[CreatedEmote]) -> String {
    let mut lines = vec!["Multiple emotes were found with that name. Which one do you mean?".to_string()];
    for (i, emote) in candidates.iter().enumerate() {
        lines.push(format!(r"{}. {} (\:{}:)", i + 1, emote, emote.name));
    }
    lines.join("\n")
}

/// One line per emote, sorted by name: the emote and its escaped raw form.
pub fn list_lines(emotes: &[CreatedEmote], filter: EmoteFilter) -> Vec<String> {
    let mut emotes: Vec<&CreatedEmote> = emotes.iter().filter(|e| filter.matches(e.animated)).collect();
    emotes.sort_by_key(|e| e.name.to_lowercase());
    emotes
        .into_iter()
        .map(|emote| {
            let raw = emote.to_string().replace(':', r"\:");
            format!("{} {}", emote, raw)
        })
        .collect()
}

pub fn stats_message(counts: EmoteCounts, limit: usize) -> String {
    let line = |kind: &str, count: usize| {
        format!(
            "{} emotes: **{} / {}** ({} left, {}% full)",
            kind,
            count,
            limit,
            limit as i64 - count as i64,
            format_percent(count, limit)
        )
    };
    format!(
        "{}\n{}\nTotal: **{} / {}**",
        line("Static", counts.static_count),
        line("Animated", counts.animated_count),
        counts.static_count + counts.animated_count,
        limit * 2
    )
}

/// Percentage rounded to two places, always with at least one decimal.
fn format_percent(count: usize, limit: usize) -> String {
    let percent = if limit == 0 {
        0.0
    } else {
        (count as f64 / limit as f64 * 10_000.0).round() / 100.0
    };
    if percent.fract() == 0.0 {
        format!("{:.1}", percent)
    } else {
        percent.to_string()
    }
}

/// A command being run in a guild.
pub struct Invocation<'a> {
    ctx: &'a Context,
    msg: &'a Message,
    state: &'a BotState,
    guild: PartialGuild,
    emotes: Vec<CreatedEmote>,
    args: Vec<String>,
}

impl<'a> Invocation<'a> {
    pub async fn run(
        command: Command,
        ctx: &'a Context,
        msg: &'a Message,
        state: &'a BotState,
        args: Vec<String>,
    ) -> CommandResult {
        let guild_id = msg
            .guild_id
            .ok_or_else(|| CommandError::user("Sorry, this command may only be used in a server."))?;
        // Straight from the API: the cache lags behind our own changes.
        let guild = ctx.http.get_guild(guild_id).await?;
        let emotes = guild
            .emojis
            .values()
            .filter(|emoji| emoji.require_colons)
            .map(|emoji| CreatedEmote {
                id: emoji.id.get(),
                name: emoji.name.clone(),
                animated: emoji.animated,
            })
            .collect();

        let mut invocation = Self {
            ctx,
            msg,
            state,
            guild,
            emotes,
            args,
        };

        if !command.is_public() {
            invocation.check_permissions().await?;
        }

        debug!(
            "{} running {} in guild {} with {:?}",
            invocation.invoker(),
            command,
            guild_id,
            invocation.args
        );

        match command {
            Command::Add => invocation.add().await,
            Command::AddThese => invocation.add_these().await,
            Command::AddFromEc => invocation.add_from_ec().await,
            Command::Import => invocation.import().await,
            Command::Export => invocation.export().await,
            Command::Remove => invocation.remove().await,
            Command::Rename => invocation.rename().await,
            Command::List => invocation.list().await,
            Command::Stats => invocation.stats().await,
            Command::Big => invocation.big().await,
        }
    }

    async fn add(&mut self) -> CommandResult {
        let attachment = self
            .msg
            .attachments
            .first()
            .map(|a| (a.filename.as_str(), a.url.as_str()));
        let request = parse_add_args(&self.state.syntax, &self.args, attachment, &self.state.prefix)
            .map_err(CommandError::User)?;

        let reason = format!("Created by {}", self.invoker());
        let mut slots = self.slots();
        let message = {
            let _typing = self.msg.channel_id.start_typing(&self.ctx.http);
            self.state
                .ingestor
                .add_emote_message(&mut slots, &request.name, ImageSource::url(request.url), &reason)
                .await
        };
        self.say(message).await
    }

    async fn add_these(&mut self) -> CommandResult {
        let mentions = self.state.syntax.find_mentions(&self.args.join(""));
        if mentions.is_empty() {
            return Err(CommandError::user("Error: no custom emotes were provided."));
        }

        let reason = format!("Created by {}", self.invoker());
        let mut slots = self.slots();
        for mention in mentions {
            let source = ImageSource::Url {
                url: mention.url(),
                trusted: true,
            };
            let message = {
                let _typing = self.msg.channel_id.start_typing(&self.ctx.http);
                self.state
                    .ingestor
                    .add_emote_message(&mut slots, &mention.name, source, &reason)
                    .await
            };
            self.say(message).await?;
        }

        self.react_success().await;
        Ok(())
    }

    async fn add_from_ec(&mut self) -> CommandResult {
        let ec = self
            .state
            .ec
            .as_ref()
            .ok_or_else(|| CommandError::user("The Emote Collector database is not available."))?;
        if self.args.is_empty() {
            return Err(self.usage("add-from-ec <name> [names...]"));
        }

        let mut slots = self.slots();
        for name in &self.args {
            let Ok(emote) = ec.get(name.trim_matches(':')) else {
                self.say("Emote not found in Emote Collector's database.").await?;
                continue;
            };

            let reason = format!(
                "Added from Emote Collector by {}. Original emote author ID: {}",
                self.invoker(),
                emote.author
            );
            let source = ImageSource::Url {
                url: emote.url(),
                trusted: true,
            };
            let message = {
                let _typing = self.msg.channel_id.start_typing(&self.ctx.http);
                self.state
                    .ingestor
                    .add_emote_message(&mut slots, name, source, &reason)
                    .await
            };
            self.say(message).await?;
        }

        if self.args.len() > 1 {
            self.react_success().await;
        }
        Ok(())
    }

    async fn import(&mut self) -> CommandResult {
        let (url, validate_headers) = match (self.args.first(), self.msg.attachments.first()) {
            (Some(_), Some(_)) => {
                return Err(CommandError::user(
                    "Either a URL or an attachment must be given, not both.",
                ))
            }
            (None, None) => return Err(CommandError::user("A URL or attachment must be given.")),
            (Some(url), None) => (strip_angle_brackets(url).to_string(), true),
            (None, Some(attachment)) => (attachment.url.clone(), false),
        };

        let ingestor = &self.state.ingestor;
        ingestor.client().check_create(self.guild.id.get())?;

        let archive = {
            let _typing = self.msg.channel_id.start_typing(&self.ctx.http);
            ingestor
                .fetcher()
                .fetch(&url, ARCHIVE_MIMETYPES, validate_headers)
                .await
                .map_err(|e| self.rendered("", e))?
        };

        let reason = format!("Created by {}", self.invoker());
        let reports = ingestor
            .import_archive(self.slots(), archive, &reason)
            .map_err(|e| self.rendered("", e))?;
        let mut reports = std::pin::pin!(reports);
        while let Some(report) = reports.next().await {
            self.say(report).await?;
        }

        self.react_success().await;
        Ok(())
    }

    async fn export(&mut self) -> CommandResult {
        let filter = EmoteFilter::parse(self.args.first().map(String::as_str)).map_err(CommandError::User)?;
        let emotes: Vec<ExportEmote> = self
            .emotes
            .iter()
            .filter(|e| filter.matches(e.animated))
            .map(|e| ExportEmote {
                id: e.id,
                name: e.name.clone(),
                animated: e.animated,
            })
            .collect();
        if emotes.is_empty() {
            return Err(CommandError::user(
                "No emotes of that type were found in this server.",
            ));
        }

        let limit = filesize_limit(self.guild.premium_tier);
        let export = {
            let _typing = self.msg.channel_id.start_typing(&self.ctx.http);
            export_emotes(self.state.ingestor.fetcher(), self.guild.id.get(), &emotes, limit).await?
        };

        for (name, error) in &export.failed {
            let message = format!("{}: {}", name, self.state.ingestor.render_error(name, error));
            self.say(message).await?;
        }
        for name in &export.oversized {
            self.say(format!(
                "{} could not be added because it alone would exceed the file size limit.",
                name
            ))
            .await?;
        }

        info!(
            "exporting {} emotes from guild {} in {} archives",
            emotes.len(),
            self.guild.id,
            export.archives.len()
        );
        for archive in export.archives {
            let file = CreateAttachment::bytes(archive.data.to_vec(), archive.file_name);
            self.msg
                .channel_id
                .send_files(&self.ctx.http, vec![file], CreateMessage::new())
                .await?;
        }
        Ok(())
    }

    async fn remove(&mut self) -> CommandResult {
        if self.args.is_empty() {
            return Err(self.usage("remove <emote> [emotes...]"));
        }

        let guild = self.guild.id.get();
        let reason = format!("Removed by {}", self.invoker());
        let args = self.args.clone();
        for argument in &args {
            self.state.ingestor.client().check_delete(guild)?;
            let emote = self.resolve_emote(argument).await?;
            self.state
                .ingestor
                .client()
                .delete(guild, emote.id, Some(&reason))
                .await
                .map_err(|e| self.rendered(&emote.name, e))?;
            self.emotes.retain(|e| e.id != emote.id);
            info!("removed emote {} ({}) from guild {}", emote.name, emote.id, guild);

            self.say(format!(r"Emote \:{}: successfully removed.", emote.name)).await?;
        }

        if args.len() > 1 {
            self.react_success().await;
        }
        Ok(())
    }

    async fn rename(&mut self) -> CommandResult {
        let [old, new_name] = self.args.as_slice() else {
            return Err(self.usage("rename <emote> <new name>"));
        };
        let (old, new_name) = (old.clone(), new_name.clone());

        let emote = self.resolve_emote(&old).await?;
        let reason = format!("Renamed by {}", self.invoker());
        let result = self
            .state
            .ingestor
            .client()
            .rename(self.guild.id.get(), emote.id, &new_name, Some(&reason))
            .await;

        match result {
            Ok(renamed) => {
                info!("renamed emote {} to {} in guild {}", emote.name, renamed.name, self.guild.id);
                if let Some(local) = self.emotes.iter_mut().find(|e| e.id == renamed.id) {
                    local.name = renamed.name;
                }
                self.say(format!(r"Emote successfully renamed to \:{}:", new_name)).await
            }
            Err(EmoteError::RemoteHttp {
                status,
                reason,
                detail,
            }) => Err(CommandError::user(crate::emotes::escape_mentions(&format!(
                "An error occurred while renaming the emote:\n{} (status code: {}):\n{}",
                reason, status, detail
            )))),
            Err(e) => Err(self.rendered(&new_name, e)),
        }
    }

    async fn list(&mut self) -> CommandResult {
        let filter = EmoteFilter::parse(self.args.first().map(String::as_str)).map_err(CommandError::User)?;
        let paginator = Paginator::from_lines(&list_lines(&self.emotes, filter), PER_PAGE);

        let session = self.state.sessions.register();
        paginator
            .run(self.ctx, self.msg.channel_id, self.msg.author.id, session)
            .await?;
        Ok(())
    }

    async fn stats(&mut self) -> CommandResult {
        let slots = self.slots();
        self.say(stats_message(slots.counts, slots.limit)).await
    }

    async fn big(&mut self) -> CommandResult {
        let Some(argument) = self.args.first().cloned() else {
            return Err(self.usage("big <emote>"));
        };

        // Emotes from other servers work too, but only by mention.
        let emote = match self.state.syntax.parse_mention(&argument) {
            Some(mention) => CreatedEmote {
                id: mention.id,
                name: mention.name,
                animated: mention.animated,
            },
            None => self.disambiguate(&argument).await?,
        };
        self.say(format!("{}: {}", emote.name, emote.url())).await
    }

    /// Find the guild emote an argument refers to, by mention or by name.
    async fn resolve_emote(&self, argument: &str) -> CommandResult<CreatedEmote> {
        if let Some(mention) = self.state.syntax.parse_mention(argument) {
            if let Some(emote) = self.emotes.iter().find(|e| e.id == mention.id) {
                return Ok(emote.clone());
            }
        }
        self.disambiguate(argument).await
    }

    /// Pick the emote called `name`, asking the invoker when several match.
    async fn disambiguate(&self, name: &str) -> CommandResult<CreatedEmote> {
        let candidates = find_candidates(&self.emotes, name);
        match candidates.len() {
            0 => return Err(EmoteError::EmoteNotFound(name.trim_matches(':').to_string()).into()),
            1 => return Ok(candidates[0].clone()),
            _ => {}
        }

        self.say(disambiguation_prompt(&candidates)).await?;
        let reply = MessageCollector::new(&self.ctx.shard)
            .channel_id(self.msg.channel_id)
            .author_id(self.msg.author.id)
            .timeout(DISAMBIGUATION_TIMEOUT)
            .filter(|m| m.content.trim().parse::<usize>().is_ok())
            .next()
            .await
            .ok_or_else(|| CommandError::user("Sorry, you took too long. Try again."))?;

        reply
            .content
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|choice| choice.checked_sub(1))
            .and_then(|index| candidates.get(index))
            .cloned()
            .ok_or_else(|| CommandError::user("That is not one of the listed emotes. Try again."))
    }

    async fn check_permissions(&self) -> CommandResult {
        let roles = &self.guild.roles;
        let everyone = roles
            .get(&RoleId::new(self.guild.id.get()))
            .map(|role| role.permissions)
            .unwrap_or_else(Permissions::empty);
        let role_permissions = |member_roles: &[RoleId]| -> Vec<Permissions> {
            member_roles
                .iter()
                .filter_map(|id| roles.get(id))
                .map(|role| role.permissions)
                .collect()
        };

        let invoker_roles = self
            .msg
            .member
            .as_ref()
            .map(|member| member.roles.clone())
            .unwrap_or_default();
        let invoker = effective_permissions(
            self.guild.owner_id,
            self.msg.author.id,
            everyone,
            role_permissions(&invoker_roles),
        );

        let bot_id = self.ctx.cache.current_user().id;
        let bot_member = self.ctx.http.get_member(self.guild.id, bot_id).await?;
        let bot = effective_permissions(
            self.guild.owner_id,
            bot_id,
            everyone,
            role_permissions(&bot_member.roles),
        );

        if invoker.contains(Permissions::MANAGE_GUILD_EXPRESSIONS)
            && bot.contains(Permissions::MANAGE_GUILD_EXPRESSIONS)
        {
            Ok(())
        } else {
            Err(CommandError::user(PERMISSION_DENIED))
        }
    }

    fn slots(&self) -> GuildSlots {
        let mut counts = EmoteCounts::default();
        for emote in &self.emotes {
            counts.record(emote.animated);
        }
        GuildSlots {
            guild: self.guild.id.get(),
            counts,
            limit: emote_limit(self.guild.premium_tier),
        }
    }

    fn invoker(&self) -> String {
        format_user(&self.msg.author.name, self.msg.author.id.get())
    }

    fn usage(&self, usage: &str) -> CommandError {
        CommandError::User(format!("Usage: `{}{}`", self.state.prefix, usage))
    }

    fn rendered(&self, name: &str, error: EmoteError) -> CommandError {
        if !error.is_expected() {
            warn!("{}: {}", name, error);
        }
        CommandError::User(self.state.ingestor.render_error(name, &error))
    }

    async fn say(&self, content: impl Into<String>) -> CommandResult {
        self.msg.channel_id.say(&self.ctx.http, content).await?;
        Ok(())
    }

    async fn react_success(&self) {
        react(self.ctx, self.msg, &self.state.ingestor.emojis().success).await;
    }
}

/// React to `msg` with a configured emoji. Failures are only logged.
pub async fn react(ctx: &Context, msg: &Message, emoji: &str) {
    let reaction = match ReactionType::try_from(emoji) {
        Ok(reaction) => reaction,
        Err(e) => {
            warn!("Invalid reaction emoji {}: {}", emoji, e);
            return;
        }
    };
    if let Err(e) = msg.react(&ctx.http, reaction).await {
        debug!("Failed to react to message {}: {}", msg.id, e);
    }
}
