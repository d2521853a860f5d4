//! Solver Service
//!
//! Main service binary wiring all components together:
//! - Chain clients and contract access per configured chain
//! - Price service refreshing native-asset prices in the background
//! - Nonce sequencer owning per-chain transaction nonces
//! - Fill pipeline evaluating every discovered intent
//! - Event sources (websocket, sse, on-chain logs) feeding the pipeline
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin solver -- --config config/solver.toml
//! ```
//!
//! Or set the config path via environment variable:
//!
//! ```bash
//! SOLVER_CONFIG_PATH=config/solver.toml cargo run --bin solver
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use compact_solver::{
    chains::{ChainClients, Contracts, RpcChainClient},
    config::SolverConfig,
    filler::{FillPipeline, Filler, SolverServices},
    nonce::NonceSequencer,
    price::{HttpPriceFeed, PriceService},
    protocol::{broadcast_log_decoder, CompactProtocol},
    rules,
    settlement::SettlementCalculator,
    sources::{IntentHandler, IntentSource, OnChainLogSource, SseSource, WebSocketSource},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "solver")]
#[command(about = "Cross-chain intent solver - watches intent sources and settles fills")]
struct Args {
    /// Path to solver configuration file (default: config/solver.toml or
    /// SOLVER_CONFIG_PATH env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize structured logging
    tracing_subscriber::fmt::init();

    info!("Starting Solver Service");

    let config = if let Some(path) = args.config {
        info!("Loading configuration from: {}", path);
        SolverConfig::load_from_path(Some(&path))?
    } else {
        if let Ok(path) = std::env::var("SOLVER_CONFIG_PATH") {
            info!("Loading configuration from SOLVER_CONFIG_PATH: {}", path);
        } else {
            info!("Loading configuration from default location");
        }
        SolverConfig::load()?
    };

    info!("Configuration loaded successfully");
    for chain in &config.chains {
        info!(
            "Chain: {} (chain ID: {}, solver: {})",
            chain.name, chain.chain_id, chain.solver_address
        );
    }
    info!("Allocators configured: {}", config.allocators.len());

    let config = Arc::new(config);

    // Chain clients for every configured chain
    let mut chains = ChainClients::new();
    for chain in &config.chains {
        let client = RpcChainClient::new(chain)
            .with_context(|| format!("Failed to create chain client for {}", chain.name))?;
        chains.insert(Arc::new(client));
    }
    let chains = Arc::new(chains);
    info!("Chain clients initialized");

    // Contract access layer
    let contracts = Arc::new(Contracts::new(Arc::clone(&chains), Arc::clone(&config)));

    // Price service with background refresh
    let price_feed = Arc::new(
        HttpPriceFeed::new(config.service.price_feed_url.clone())
            .context("Failed to create price feed")?,
    );
    let price_assets: HashMap<u64, String> = config
        .chains
        .iter()
        .map(|c| (c.chain_id, c.tokens.native.price_feed_id.clone()))
        .collect();
    let price = Arc::new(PriceService::new(
        price_feed,
        price_assets,
        Duration::from_millis(config.service.price_refresh_ms),
        Duration::from_millis(config.service.price_stale_ms),
    ));
    let price_task = price.spawn();
    info!("Price service started");

    // Nonce sequencer owning per-chain transaction nonces
    let nonces = Arc::new(NonceSequencer::new(Arc::clone(&chains)));

    // Settlement calculator
    let settlement = Arc::new(SettlementCalculator::new(
        Arc::clone(&chains),
        Arc::clone(&contracts),
        Arc::clone(&price),
        Arc::clone(&config),
    ));

    let services = Arc::new(SolverServices {
        config: Arc::clone(&config),
        chains: Arc::clone(&chains),
        contracts,
        price,
        nonces,
        settlement,
    });

    // Fill pipeline: base rules plus any configured custom rules
    let custom_rules = rules::resolve_custom_rules(&config.rules.custom, &[])?;
    let pipeline: Arc<dyn Filler> = Arc::new(FillPipeline::new(
        CompactProtocol,
        Arc::clone(&services),
        custom_rules,
    ));
    info!("Fill pipeline initialized");

    // Every discovered intent runs its own pipeline instance
    let handler: IntentHandler = {
        let pipeline = Arc::clone(&pipeline);
        Arc::new(move |raw| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline.evaluate(raw).await;
            });
        })
    };

    // Subscribe all configured sources
    let mut subscriptions = Vec::new();

    for source_config in &config.sources.websockets {
        let source = WebSocketSource::new(source_config);
        let subscription = source.subscribe(Arc::clone(&handler)).await?;
        info!("Websocket source subscribed: {}", source_config.url);
        subscriptions.push(subscription);
    }

    for source_config in &config.sources.sse {
        let source = SseSource::new(source_config);
        let subscription = source.subscribe(Arc::clone(&handler)).await?;
        info!("SSE source subscribed: {}", source_config.url);
        subscriptions.push(subscription);
    }

    for source_config in &config.sources.onchain {
        let client = chains.get(source_config.chain_id)?;
        let source =
            OnChainLogSource::new(source_config, Arc::clone(client), broadcast_log_decoder())?;
        let subscription = source.subscribe(Arc::clone(&handler)).await?;
        info!(
            "On-chain source subscribed: chain {} contract {}",
            source_config.chain_id, source_config.address
        );
        subscriptions.push(subscription);
    }

    if subscriptions.is_empty() {
        error!("No intent sources configured; the solver would sit idle");
        anyhow::bail!("at least one intent source must be configured");
    }

    info!("All services started");

    // Run until shutdown
    signal::ctrl_c().await?;
    info!("Received shutdown signal, stopping services...");

    for subscription in subscriptions {
        subscription.close();
    }
    price_task.abort();

    info!("Solver service stopped");
    Ok(())
}
