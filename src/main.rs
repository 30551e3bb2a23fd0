//! Trailing Stop-Loss Trading Bot
//!
//! Holds at most one position per symbol, trails a stop-loss behind the
//! highest observed price, optionally takes profit at a fixed target, and
//! streams balance/position snapshots to dashboard subscribers.

mod balance;
mod config;
mod engine;
mod lifecycle;
mod models;
mod telemetry;
mod venue;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::balance::{BalanceCache, BalanceSource};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::lifecycle::LifecycleController;
use crate::telemetry::{EngineEvent, TelemetryPublisher};
use crate::venue::{RestVenue, SimVenue, Venue};

/// Trailing stop-loss bot CLI.
#[derive(Parser)]
#[command(name = "trailbot")]
#[command(about = "Trade with a trailing stop-loss and stream state to a dashboard", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading engine
    Run {
        /// Use the simulated venue instead of the REST venue
        #[arg(long)]
        sim: bool,

        /// Simulated starting balance (only with --sim)
        #[arg(long, default_value = "1000")]
        sim_balance: Decimal,

        /// Seconds between engine ticks
        #[arg(short, long, default_value = "5")]
        interval: u64,

        /// Path of the durable balance cache
        #[arg(long, default_value = "balance.json")]
        cache: PathBuf,

        /// Fraction of the balance committed per trade
        #[arg(long, default_value = "0.02")]
        trade_fraction: Decimal,

        /// Trailing stop distance as a fraction of the highest price
        #[arg(long, default_value = "0.03")]
        stop_loss: Decimal,

        /// Take-profit distance from entry; 0 disables target exits
        #[arg(long, default_value = "0.05")]
        take_profit: Decimal,

        /// Minimum balance required to open a position
        #[arg(long, default_value = "10")]
        min_balance: Decimal,

        /// Symbols to trade, comma separated
        #[arg(long, value_delimiter = ',', default_value = "BTC/USDT,ETH/USDT,XRP/USDT")]
        symbols: Vec<String>,
    },

    /// Show the effective default configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            sim,
            sim_balance,
            interval,
            cache,
            trade_fraction,
            stop_loss,
            take_profit,
            min_balance,
            symbols,
        } => {
            let config = EngineConfig {
                trade_fraction,
                stop_loss_pct: stop_loss,
                take_profit_pct: (take_profit > Decimal::ZERO).then_some(take_profit),
                min_trade_balance: min_balance,
                tick_interval: Duration::from_secs(interval),
                symbols,
            };
            config.validate()?;

            // An unreachable venue configuration is fatal here, before the
            // engine is ever started.
            let venue: Arc<dyn Venue> = if sim {
                Arc::new(SimVenue::new(sim_balance))
            } else {
                Arc::new(
                    RestVenue::from_env()
                        .context("Venue not configured; set VENUE_API_URL and VENUE_API_KEY")?,
                )
            };

            let telemetry = TelemetryPublisher::new();
            let balance = BalanceSource::new(venue.clone(), BalanceCache::new(&cache));
            let engine = Engine::new(config.clone(), venue, balance, telemetry.clone())?;
            let controller = LifecycleController::new();

            spawn_dashboard_feed(&telemetry);

            controller
                .start(engine)
                .await
                .context("Failed to start engine")?;

            println!("\n=== Trailbot ===");
            println!("Mode:        {}", if sim { "SIMULATED venue" } else { "LIVE venue" });
            println!("Symbols:     {}", config.symbols.join(", "));
            println!("Tick every:  {}s", interval);
            println!("Stop-loss:   {}%", config.stop_loss_pct * Decimal::from(100));
            match config.take_profit_pct {
                Some(tp) => println!("Take-profit: {}%", tp * Decimal::from(100)),
                None => println!("Take-profit: disabled"),
            }
            println!("\nPress Ctrl+C to stop.\n");

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");

            if let Err(e) = controller.stop().await {
                warn!(error = %e, "Stop request rejected");
            }
            println!("Final state: {}", controller.status().await);
        }

        Commands::Config => {
            let config = EngineConfig::default();

            println!("\n=== Engine Configuration ===\n");
            println!("Trade Fraction:    {}%", config.trade_fraction * Decimal::from(100));
            println!("Stop Loss:         {}%", config.stop_loss_pct * Decimal::from(100));
            match config.take_profit_pct {
                Some(tp) => println!("Take Profit:       {}%", tp * Decimal::from(100)),
                None => println!("Take Profit:       disabled"),
            }
            println!("Min Trade Balance: {}", config.min_trade_balance);
            println!("Tick Interval:     {:?}", config.tick_interval);
            println!("Symbols:           {}", config.symbols.join(", "));
        }
    }

    Ok(())
}

/// Forward telemetry to stdout: the stand-in for the live dashboard channel.
///
/// Both subscribers tolerate lag; a dropped message only costs staleness.
fn spawn_dashboard_feed(telemetry: &TelemetryPublisher) {
    let mut snapshots = telemetry.subscribe_snapshots();
    tokio::spawn(async move {
        loop {
            match snapshots.recv().await {
                Ok(snapshot) => {
                    let positions: Vec<String> = snapshot
                        .positions
                        .iter()
                        .map(|p| format!("{} @ {} (stop {})", p.symbol(), p.entry_price(), p.stop_loss()))
                        .collect();
                    println!(
                        "[{}] balance {:.2} ({}) | positions: {}",
                        snapshot.timestamp.format("%H:%M:%S"),
                        snapshot.balance.total,
                        if snapshot.balance.is_live() { "live" } else { "cached" },
                        if positions.is_empty() { "none".to_string() } else { positions.join("; ") }
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Dashboard feed lagged, dropping snapshots");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut events = telemetry.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::PositionClosed { symbol, exit_price, reason, return_pct, .. }) => {
                    println!(
                        ">>> closed {} at {} ({}), return {}%",
                        symbol,
                        exit_price,
                        reason,
                        return_pct * Decimal::from(100)
                    );
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
