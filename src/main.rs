//! Emote Manager - a Discord bot for managing custom server emotes
//!
//! Adds emotes from URLs, attachments, other emotes and archives, shrinking
//! or converting images to fit, and lists, renames, removes and exports them.
//! Run as `emote-manager resize|convert`, the binary is the image worker
//! the bot hands untrusted images to.

mod archive;
mod common;
mod config;
mod discord;
mod emotes;
mod image;

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use config::{env::get_config_path, load_and_validate, Config, WorkerMode};
use discord::{BotState, DiscordBotBuilder};
use emotes::{EmoteClient, EmoteCollector, Fetcher, GuildRateLimiter, Ingestor};
use crate::image::{ImageWorker, Operation, SubprocessWorker, ThreadWorker};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    if let Some(operation) = args.next().filter(|arg| Operation::from_arg(arg).is_some()) {
        // Worker mode: stdout carries the image, so logs go to stderr.
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::WARN.into()),
            )
            .with_writer(std::io::stderr)
            .init();
        std::process::exit(crate::image::worker::run(&operation));
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run_bot())
}

async fn run_bot() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Emote Manager v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        error!("See the example configuration for reference.");
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  Prefix: {}", config.discord.prefix);
    info!("  API: {}", config.http.api_base_url);
    info!("  Image worker: {}", config.images.worker_mode);

    let ingestor = build_ingestor(&config)?;

    let ec = match &config.ec.emotes_path {
        Some(path) => Some(EmoteCollector::load(path)?),
        None => {
            info!("No Emote Collector database configured, add-from-ec is disabled");
            None
        }
    };

    let state = Arc::new(BotState::new(ingestor, ec, config.discord.prefix.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let discord_bot = DiscordBotBuilder::new(config.discord.token.clone(), state, shutdown_rx)
        .build()
        .await?;

    info!("Starting Discord bot...");
    let mut discord_task = tokio::spawn(async move {
        discord_bot.run().await;
    });

    let shutdown = tokio::select! {
        biased;
        _ = shutdown_signal() => {
            info!("Shutdown signal received - closing sessions...");
            true
        }
        _ = &mut discord_task => false,
    };

    // Handle graceful shutdown
    if shutdown {
        if let Err(e) = shutdown_tx.send(true) {
            debug!("Shutdown channel closed (bot already exited): {}", e);
        }
        let timeout = tokio::time::Duration::from_secs(5);
        match tokio::time::timeout(timeout, discord_task).await {
            Ok(Ok(())) => info!("Discord bot stopped gracefully"),
            Ok(Err(e)) => warn!("Discord task panicked: {}", e),
            Err(_) => warn!("Discord shutdown timed out"),
        }
    }

    info!("Exiting...");
    Ok(())
}

/// Wire the HTTP clients, rate limiter and image worker together.
fn build_ingestor(config: &Config) -> Result<Ingestor> {
    let http = reqwest::Client::builder()
        .user_agent(config.http.user_agent.as_str())
        .build()?;

    let fetcher = Fetcher::new(
        http.clone(),
        config.http.head_timeout(),
        config.http.read_timeout(),
    );

    let limiter = Arc::new(GuildRateLimiter::new());
    let client = Arc::new(EmoteClient::new(
        http,
        config.http.api_base_url.clone(),
        config.discord.token.clone(),
        limiter,
    ));

    let worker: Arc<dyn ImageWorker> = match config.images.worker_mode() {
        Some(WorkerMode::Thread) => Arc::new(ThreadWorker),
        _ => match &config.images.worker_path {
            Some(path) => Arc::new(SubprocessWorker::new(path)),
            None => Arc::new(SubprocessWorker::current_exe()?),
        },
    };

    Ok(Ingestor::new(
        fetcher,
        client,
        worker,
        config.ingest_settings(),
        config.status_emojis(),
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
