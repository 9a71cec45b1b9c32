//! Bustline daemon.
//!
//! Boots the round engine against the in-memory backends and logs every
//! engine event. The transport layer (sockets, auth, wallet protocol)
//! attaches through `scheduler.place_wager` / `pull_wager` and
//! `events.subscribe()`; until one is wired in, this binary doubles as a
//! headless demo that plays rounds for a synthetic audience.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use bustline::config::{AppConfig, ConfigLoader};
use bustline::engine::RoundScheduler;
use bustline::events::EventBus;
use bustline::presence::{ConnectionRegistry, Presence};
use bustline::store::{InMemoryStore, MemoryPauseStore, Persistence};
use bustline::wallet::OfflineWallet;

#[derive(Parser, Debug)]
#[command(name = "bustline")]
#[command(about = "Crash-game round engine", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seeds to generate when no chain file is configured
    #[arg(long, default_value = "10000")]
    generated_seeds: usize,

    /// Custodial wallet balance for the offline wallet stand-in
    #[arg(long, default_value = "1000000")]
    custodial_balance: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bustline=info".into()),
        )
        .init();

    let config: AppConfig = match &args.config {
        Some(path) => ConfigLoader::new().with_path(path).load()?,
        None => ConfigLoader::new().load()?,
    };

    let store = match &config.system.chain_file {
        Some(path) => {
            info!(%path, "loading committed seed chain");
            Arc::new(InMemoryStore::from_chain_file(std::path::Path::new(path))?)
        }
        None => {
            info!(seeds = args.generated_seeds, "generating a volatile seed chain");
            Arc::new(InMemoryStore::with_seed_chain(args.generated_seeds))
        }
    };

    let registry = Arc::new(ConnectionRegistry::new());
    let events = EventBus::new(config.system.event_capacity);

    let scheduler = RoundScheduler::init(
        config.game.clone(),
        Arc::clone(&store) as Arc<dyn Persistence>,
        Arc::new(MemoryPauseStore::new()),
        Arc::clone(&registry) as Arc<dyn Presence>,
        Arc::new(OfflineWallet::new(args.custodial_balance)),
        events.clone(),
    )
    .await?;

    info!(
        name = %config.system.name,
        committed_seeds = store.seed_count(),
        "engine ready"
    );

    // Synthetic audience so the loop runs; a real transport layer calls
    // these on client connect/disconnect instead.
    registry.client_connected();
    scheduler.try_bootstrap();

    let mut rx = events.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => info!(?event, "engine event"),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                info!(skipped, "event log fell behind");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    Ok(())
}
