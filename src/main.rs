//! Polymarket 15-Minute Dump-and-Hedge Trading Bot
//!
//! Watches each configured asset's up/down market for a sudden one-sided
//! price dump, buys the dropped side, hedges the opposite side under a sum
//! target (or at the stop-loss deadline), and reconciles profit when the
//! market settles.

mod config;
mod executor;
mod history;
mod ledger;
mod models;
mod monitor;
mod polymarket;
mod price_history;
mod settlement;
mod trader;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::BotConfig;
use history::HistoryLog;
use monitor::MarketMonitor;
use polymarket::PolymarketClient;
use trader::DumpHedgeTrader;

/// Dump-and-hedge trading bot for Polymarket 15-minute up/down markets
#[derive(Parser, Debug)]
#[command(name = "hedge-bot")]
#[command(about = "Automated dump-and-hedge bot for Polymarket 15-minute markets")]
struct Args {
    /// Trade with real orders (default is simulation)
    #[arg(long)]
    production: bool,

    /// Path to the YAML configuration file
    #[arg(long, default_value = "config/bot_config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&log_filter))
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("╔══════════════════════════════════════════════════════════════╗");
    info!("║       POLYMARKET DUMP-AND-HEDGE TRADING BOT                  ║");
    info!("╚══════════════════════════════════════════════════════════════╝");

    let config = BotConfig::load_with_env(&args.config).context("Failed to load configuration")?;

    let simulation = !(args.production || config::production_from_env());

    info!("Strategy: DUMP-AND-HEDGE");
    info!(
        "  Markets: {}",
        config
            .markets
            .assets
            .iter()
            .map(|a| a.to_uppercase())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("  Shares per leg: {}", config.strategy.shares_per_leg);
    info!("  Sum target: {}", config.strategy.sum_target);
    info!(
        "  Move threshold: {}%",
        config.strategy.move_threshold * 100.0
    );
    info!(
        "  Watch window: {} minutes",
        config.strategy.watch_window_minutes
    );
    info!(
        "  Stop loss: max wait {} min",
        config.strategy.stop_loss_max_wait_minutes
    );
    info!(
        "  Mode: {}",
        if simulation { "SIMULATION" } else { "PRODUCTION" }
    );

    let history = Arc::new(if config.logging.history_path.is_empty() {
        HistoryLog::disabled()
    } else {
        HistoryLog::open(std::path::Path::new(&config.logging.history_path))?
    });

    let api = Arc::new(
        PolymarketClient::new(config.polling.request_timeout_ms)
            .context("Failed to create Polymarket client")?,
    );

    // Live trading without signing credentials must die here, before any
    // order could be attempted.
    let order_executor = if simulation {
        None
    } else {
        let private_key = std::env::var("POLYMARKET_PRIVATE_KEY")
            .context("POLYMARKET_PRIVATE_KEY not set - required for production mode")?;
        info!("Authenticating with Polymarket CLOB API...");
        let exec = executor::Executor::new(&private_key, None)
            .await
            .context("Failed to initialize order executor")?;
        info!("Authentication successful: {}", exec.wallet_address());
        Some(Arc::new(exec))
    };

    let trader = Arc::new(RwLock::new(DumpHedgeTrader::new(
        api.clone(),
        order_executor,
        history.clone(),
        simulation,
        &config.strategy,
    )));

    // Resolve the active market for every configured asset; a failed asset
    // is skipped, no assets at all is fatal.
    let mut discovered = Vec::new();
    for asset in &config.markets.assets {
        let market_name = format!("{} 15m", asset.to_uppercase());
        info!("Discovering {market_name} market...");
        match api.discover_market_for_asset(asset).await {
            Ok(market) => {
                info!(
                    "Found {market_name} market by slug: {} | Condition ID: {}",
                    market.slug, market.condition_id
                );
                discovered.push((asset.clone(), market_name, market));
            }
            Err(e) => warn!("Failed to discover {market_name} market: {e} Skipping..."),
        }
    }
    if discovered.is_empty() {
        anyhow::bail!("No valid markets found. Check MARKETS and network.");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::new();

    // Process-wide settlement sweep.
    {
        let trader = trader.clone();
        let mut shutdown = shutdown_rx.clone();
        let sweep_interval = Duration::from_secs(config.polling.settlement_sweep_secs);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let now = Utc::now().timestamp();
                let mut trader = trader.write().await;
                if let Err(e) = trader.check_market_closures(now).await {
                    warn!("Error checking market closures: {e}");
                }
                let (period, total) = (trader.period_profit(), trader.total_profit());
                if period != 0.0 || total != 0.0 {
                    info!("Current Profit - Period: ${period:.2} | Total: ${total:.2}");
                }
            }
            info!("Settlement sweep stopped");
        }));
    }

    let market_count = discovered.len();
    for (asset, market_name, market) in discovered {
        let monitor = Arc::new(RwLock::new(MarketMonitor::new(
            api.clone(),
            history.clone(),
            market_name,
            market,
        )));

        tasks.push(tokio::spawn(monitor::run_poll_loop(
            monitor.clone(),
            trader.clone(),
            config.polling.interval_ms,
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(monitor::run_rollover_watcher(
            api.clone(),
            asset,
            monitor,
            trader.clone(),
            shutdown_rx.clone(),
        )));
    }

    info!("Started monitoring {market_count} market(s)");
    info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, stopping bot...");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            error!("Task ended abnormally: {e}");
        }
    }

    history.flush();
    info!("Shutdown complete");
    Ok(())
}
