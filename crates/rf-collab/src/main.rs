//! ReelForge Collab - headless session client
//!
//! Usage:
//!   rf-collab join --room jam --username Ana     - Join a room and mirror it
//!   rf-collab init-config collab.json            - Write a default config file

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use rf_collab::{Intent, SessionIdentity, SyncConfig, SyncCoordinator, run_session};
use rf_connector::RelayConnector;
use rf_core::{RoomId, UserId};

#[derive(Parser)]
#[command(name = "rf-collab", version, about = "ReelForge collaboration client")]
struct Cli {
    /// Log filter (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a room and keep a live copy of its arrangement
    Join {
        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Relay URL (overrides the config)
        #[arg(long)]
        relay: Option<String>,
        /// Room to join
        #[arg(short, long)]
        room: Option<String>,
        /// Stable user id (random when omitted)
        #[arg(long)]
        user_id: Option<String>,
        /// Display name
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Write a config file with every default spelled out
    InitConfig {
        /// Destination
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    match cli.command {
        Commands::Join {
            config,
            relay,
            room,
            user_id,
            username,
        } => {
            let mut config = match config {
                Some(path) => SyncConfig::load(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => SyncConfig::default(),
            };
            if let Some(url) = relay {
                config.relay.url = url;
            }

            let room_id = room
                .or(config.room_id.take())
                .context("No room given (--room or roomId in the config)")?;
            let user_id = user_id.map(UserId::new).unwrap_or_else(UserId::generate);
            let username = username.or(config.username.take()).unwrap_or_else(|| {
                let short: String = user_id.as_str().chars().take(6).collect();
                format!("guest-{}", short)
            });

            join(config, SessionIdentity::new(RoomId::new(room_id), user_id, username)).await
        }
        Commands::InitConfig { path } => {
            SyncConfig::default()
                .save_to(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

async fn join(config: SyncConfig, identity: SessionIdentity) -> Result<()> {
    log::info!(
        "Joining room {} on {} as {}",
        identity.room_id,
        config.relay.url,
        identity.username
    );

    let mut coordinator = SyncCoordinator::new(&config.batching);
    let document = coordinator.document_mut();
    document
        .tracks
        .subscribe(|event| log::debug!("[Tracks] {:?}", event));
    document
        .regions
        .subscribe(|event| log::debug!("[Regions] {:?}", event));
    document
        .markers
        .subscribe(|event| log::debug!("[Markers] {:?}", event));
    document.settings.subscribe(|settings| {
        log::info!(
            "[Project] {} bpm, {}/{}",
            settings.bpm,
            settings.time_signature.numerator,
            settings.time_signature.denominator
        )
    });

    let mut connector = RelayConnector::new(config.relay);
    let relay_events = connector
        .connect()
        .await
        .context("Failed to connect to the relay")?;

    // Headless: nothing produces local intents
    let (intent_tx, intent_rx) = mpsc::unbounded_channel::<Intent>();

    let coordinator = run_session(
        coordinator,
        identity,
        connector.handle(),
        relay_events,
        intent_rx,
        async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        },
    )
    .await;
    drop(intent_tx);

    let stats = coordinator.stats();
    log::info!(
        "Session over: {} sent, {} applied, {} dropped, {} failed, {} lock conflicts",
        stats.emitted,
        stats.applied,
        stats.dropped,
        stats.failed,
        stats.lock_conflicts
    );

    connector.disconnect().await?;
    Ok(())
}
