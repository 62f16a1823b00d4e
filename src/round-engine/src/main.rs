//! Round Engine - runs the daily competition lifecycle.
//!
//! Rotates the round id at 00:00 UTC, opens deposits at 01:00, pauses them
//! at 22:00 and closes the round at 23:00 (settle, archive, pay the
//! winner, pause the vault, clear the board). In between it settles open
//! positions against oracle prices on a fixed cadence and keeps the live
//! leaderboard current.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::{BirdeyeClient, Config, MemoryStore, PgStore, Store};

mod metrics;
mod scheduler;
mod settlement;
mod vault;

use scheduler::RoundScheduler;
use settlement::SettlementEngine;
use vault::VaultRpcClient;

/// Round Engine - daily round lifecycle and settlement
#[derive(Parser, Debug)]
#[command(name = "round-engine")]
#[command(about = "Runs the daily round lifecycle and periodic settlement")]
struct Args {
    /// Settlement cadence in seconds (clamped to 300-600)
    #[arg(long)]
    settle_interval_secs: Option<u64>,

    /// Use the in-memory store instead of Postgres (local runs)
    #[arg(long)]
    memory_store: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("=== Round Engine ===");

    dotenvy::dotenv().ok();
    let config = if args.memory_store {
        // memory mode has no database, so DATABASE_URL is not required
        Config::from_env().unwrap_or(Config {
            database_url: String::new(),
            oracle_api_url: "https://public-api.birdeye.so".to_string(),
            oracle_api_key: String::new(),
            vault_rpc_url: "http://127.0.0.1:8899".to_string(),
            settle_interval_secs: 300,
        })
    } else {
        Config::from_env()?
    };

    let settle_interval_secs = args
        .settle_interval_secs
        .unwrap_or(config.settle_interval_secs)
        .clamp(300, 600);

    info!("Settle interval: {} seconds", settle_interval_secs);
    info!("Oracle: {}", config.oracle_api_url);
    info!("Vault: {}", config.vault_rpc_url);

    let store: Arc<dyn Store> = if args.memory_store {
        info!("Using in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        let pg = PgStore::connect(&config).await?;
        pg.health_check().await?;
        info!("Connected to database");
        Arc::new(pg)
    };

    let oracle = Arc::new(BirdeyeClient::new(&config));
    let vault = Arc::new(VaultRpcClient::new(&config));
    let engine = SettlementEngine::new(store.clone(), oracle);

    let scheduler = RoundScheduler::new(
        store,
        engine,
        vault,
        Duration::from_secs(settle_interval_secs),
    )
    .await?;

    scheduler.run().await;

    info!("Round engine stopped");
    Ok(())
}
