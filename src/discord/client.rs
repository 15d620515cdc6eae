//! Discord bot client abstraction.
//!
//! Provides a high-level interface for creating and running the Discord bot,
//! hiding serenity implementation details from the rest of the application.

use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use serenity::async_trait;
use serenity::http::HttpBuilder;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use serenity::Client;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::discord::commands::BotState;
use crate::discord::handler::CommandHandler;

/// Longest wait between reconnection attempts.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub enum DiscordBotEvent {
    /// Bot connected and ready.
    Ready(Ready),
    /// Message received.
    Message {
        context: Context,
        message: serenity::model::channel::Message,
    },
    Disconnected,
}

struct DiscordBotEvents {
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
}

impl DiscordBotEvents {
    fn new(discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>) -> Self {
        Self { discord_events_tx }
    }
}

#[async_trait]
impl EventHandler for DiscordBotEvents {
    async fn ready(&self, _context: Context, ready: Ready) {
        if let Err(error) = self.discord_events_tx.send(DiscordBotEvent::Ready(ready)) {
            warn!("Failed to process discord event: {}", error);
        }
    }

    async fn message(&self, context: Context, message: serenity::model::channel::Message) {
        if let Err(error) = self.discord_events_tx.send(DiscordBotEvent::Message { context, message }) {
            warn!("Failed to process discord event: {}", error);
        }
    }
}

/// Builder for creating the Discord bot.
pub struct DiscordBotBuilder {
    token: String,
    state: Arc<BotState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl DiscordBotBuilder {
    /// Create a new Discord bot builder.
    pub fn new(token: String, state: Arc<BotState>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            token,
            state,
            shutdown_rx,
        }
    }

    /// Build the Discord bot.
    pub async fn build(self) -> anyhow::Result<DiscordBot> {
        let (discord_events_tx, discord_events_rx) = mpsc::unbounded_channel::<DiscordBotEvent>();

        let client = build_client(&self.token, discord_events_tx.clone()).await?;

        info!("Command prefix is {}", self.state.prefix);

        Ok(DiscordBot {
            client: Some(client),
            token: self.token,
            handler: CommandHandler::new(self.state),
            discord_events_rx,
            discord_events_tx,
            shutdown_rx: self.shutdown_rx,
        })
    }
}

async fn build_client(token: &str, discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>) -> anyhow::Result<Client> {
    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::GUILD_EMOJIS_AND_STICKERS
        | GatewayIntents::DIRECT_MESSAGES;

    // Build a custom reqwest client with timeout settings
    let reqwest_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    // Build the Serenity HTTP client with our custom reqwest client
    let http = HttpBuilder::new(token)
        .client(reqwest_client)
        .build();

    let events = DiscordBotEvents::new(discord_events_tx);
    let client = serenity::client::ClientBuilder::new_with_http(http, intents)
        .event_handler(events)
        .await?;
    Ok(client)
}

pub struct DiscordBot {
    client: Option<Client>,
    token: String,
    handler: CommandHandler,
    discord_events_rx: mpsc::UnboundedReceiver<DiscordBotEvent>,
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

impl DiscordBot {
    pub async fn run(mut self) {
        // Extract shard manager before we move client into run_connection
        let shard_manager = self.client.as_ref()
            .map(|c| c.shard_manager.clone());
        let state = self.handler.state().clone();
        let client = &mut self.client;
        let discord_events_rx = &mut self.discord_events_rx;
        let handler = &self.handler;
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::select! {
            _ = Self::run_connection(client, &self.token, &self.discord_events_tx) => {},
            _ = Self::process_events(discord_events_rx, handler, &mut self.shutdown_rx) => {},
            _ = async {
                // Wait for shutdown signal
                loop {
                    if shutdown_rx.changed().await.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            } => {}
        }

        info!("Closing {} paginators...", state.sessions.active());
        state.sessions.close_all();

        // Gracefully shutdown Discord gateway
        if let Some(ref manager) = shard_manager {
            info!("Initiating graceful Discord shutdown...");
            manager.shutdown_all().await;
            info!("Discord shutdown complete");
        }
        info!("Discord task ended");
    }

    async fn run_connection(client: &mut Option<Client>, token: &str, discord_events_tx: &mpsc::UnboundedSender<DiscordBotEvent>) {
        /// Create an exponential backoff iterator for Discord reconnection.
        /// 5s initial, 5min max, factor 1.1, with jitter, unlimited retries.
        fn discord_backoff() -> impl Iterator<Item = Duration> {
            backon::ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(5))
                .with_max_delay(MAX_RECONNECT_DELAY)
                .with_factor(1.1)
                .with_jitter()
                .without_max_times()
                .build()
        }

        let mut backoff = discord_backoff();

        loop {
            info!("Connecting to Discord...");

            let mut client = match client.take() {
                Some(client) => client,
                None => {
                    // serenity mostly handles reconnections itself.
                    match build_client(token, discord_events_tx.clone()).await {
                        Ok(client) => {
                            backoff = discord_backoff();
                            client
                        }
                        Err(e) => {
                            error!("Failed to rebuild Discord client: {}", e);
                            let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
                            warn!("Retrying in {:.1}s...", delay.as_secs_f64());
                            sleep(delay).await;
                            continue;
                        }
                    }
                }
            };

            // Run the client
            match client.start().await {
                Ok(()) => {
                    info!("Discord client disconnected normally");
                    if let Err(error) = discord_events_tx.send(DiscordBotEvent::Disconnected) {
                        warn!("Failed to process discord event: {}", error);
                    }
                    break;
                }
                Err(e) => {
                    error!("Discord client error: {}", e);
                    let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
                    warn!(
                        "Discord disconnected. Reconnecting in {:.1}s...",
                        delay.as_secs_f64(),
                    );
                    if let Err(error) = discord_events_tx.send(DiscordBotEvent::Disconnected) {
                        warn!("Failed to process discord event: {}", error);
                    }
                    sleep(delay).await;
                }
            }
        }
    }

    async fn process_events(
        discord_events_rx: &mut mpsc::UnboundedReceiver<DiscordBotEvent>,
        handler: &CommandHandler,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        let mut connected = false;

        loop {
            tokio::select! {
                event = discord_events_rx.recv() => {
                    match event {
                        Some(DiscordBotEvent::Ready(ready)) => {
                            info!(
                                "Discord bot connected as {} in {} guilds",
                                ready.user.name,
                                ready.guilds.len()
                            );
                            connected = true;
                        }
                        Some(DiscordBotEvent::Message { context, message }) => {
                            handler.handle_message(context, message).await;
                        }
                        Some(DiscordBotEvent::Disconnected) => {
                            if connected {
                                warn!("Lost connection to Discord");
                            }
                            connected = false;
                        }
                        None => {
                            debug!("Discord events channel closed.");
                            break;
                        }
                    }
                }

                // Shutdown signal
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event processing");
                        break;
                    }
                }
            }
        }
    }
}
