//! stratmirror
//!
//! Follows published strategies and mirrors their trades into brokerage
//! accounts described by a TOML session file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use strategy_mirror::db::SignalLedger;
use strategy_mirror::settings::SessionSettings;
use strategy_mirror::telemetry::{self, LogConfig};
use strategy_mirror::trading::preview_capital;
use strategy_mirror::{follower, BrokerKind, FollowHandle, PlatformKind, SessionSummary};

/// Strategy mirroring CLI.
#[derive(Parser)]
#[command(name = "stratmirror")]
#[command(about = "Mirror trades from published strategies into brokerage accounts", long_about = None)]
struct Cli {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "STRATMIRROR_LOG")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow every strategy in a session file until Ctrl+C
    Follow {
        /// Session file (TOML)
        #[arg(short, long, env = "STRATMIRROR_SESSION")]
        session: PathBuf,

        /// Signal ledger URL, overrides the session file
        #[arg(long, env = "STRATMIRROR_LEDGER")]
        ledger: Option<String>,

        /// Poll interval in milliseconds, overrides the session file
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Show the capital each subscriber would trade with
    Preview {
        /// Session file (TOML)
        #[arg(short, long, env = "STRATMIRROR_SESSION")]
        session: PathBuf,
    },

    /// Show the effective follow configuration of a session
    Config {
        /// Session file (TOML)
        #[arg(short, long, env = "STRATMIRROR_SESSION")]
        session: PathBuf,
    },

    /// Show dispatch history recorded in a ledger
    History {
        /// Signal ledger URL
        #[arg(long, env = "STRATMIRROR_LEDGER")]
        ledger: String,

        /// Strategy id
        #[arg(short, long)]
        strategy: String,

        /// Number of recent dispatches to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },

    /// List supported brokers and their aliases
    Brokers,

    /// List supported platforms and their aliases
    Platforms,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    telemetry::init(&LogConfig::new(cli.log_level.clone(), cli.log_json)).context("failed to set up logging")?;

    match cli.command {
        Commands::Follow {
            session,
            ledger,
            interval,
        } => {
            let mut settings = load_session(&session)?;
            if let Some(ms) = interval {
                settings.follow.poll_interval_ms = ms;
            }
            run_follow(settings, ledger).await?;
        }

        Commands::Preview { session } => {
            let settings = load_session(&session)?;
            let follower = follower(&settings.platform, settings.follower_options())
                .context("failed to create platform reader")?;
            let source = follower.source();

            println!("\n{:<16} {:<16} {:>16}", "STRATEGY", "SUBSCRIBER", "CAPITAL");
            println!("{}", "-".repeat(50));

            for strategy in &settings.strategies {
                for (index, sub) in settings.subscribers.iter().enumerate() {
                    let label = sub.label_or(index);

                    match preview_capital(source.as_ref(), strategy, sub.capital()).await {
                        Ok(value) => println!("{:<16} {:<16} {:>16.2}", strategy, label, value),
                        Err(e) => println!("{:<16} {:<16} {:>16}", strategy, label, format!("error: {}", e)),
                    }
                }
            }
        }

        Commands::Config { session } => {
            let settings = load_session(&session)?;
            let cfg = &settings.follow;

            println!("\n=== Session ===\n");
            println!("  Platform:             {}", settings.platform);
            println!("  Strategies:           {}", settings.strategies.join(", "));
            println!("  Subscribers:          {}", settings.subscribers.len());
            println!("  Ledger:               {}", settings.ledger.as_deref().unwrap_or("(in memory)"));

            println!("\n=== Follow Configuration ===\n");
            println!("  Poll Interval:        {}ms", cfg.poll_interval_ms);
            println!("  Order Interval:       {}ms", cfg.order_interval_ms);
            match cfg.signal_expiry_secs {
                Some(secs) => println!("  Signal Expiry:        {}s", secs),
                None => println!("  Signal Expiry:        off"),
            }
            println!("  Slippage:             {}%", cfg.slippage * rust_decimal::Decimal::ONE_HUNDRED);
            println!("  Lot Size:             {}", cfg.lot_size);
            println!("  Cap Sells:            {}", cfg.cap_sells_to_holdings);

            println!("\nRetry:");
            println!("  Max Attempts:         {}", cfg.retry.max_attempts);
            println!("  Initial Interval:     {}ms", cfg.retry.initial_interval_ms);
            println!("  Multiplier:           {}", cfg.retry.multiplier);
            println!("  Max Interval:         {}ms", cfg.retry.max_interval_ms);
        }

        Commands::History { ledger, strategy, limit } => {
            let ledger = SignalLedger::new(&ledger).await.context("failed to open ledger")?;

            let counts = ledger.outcome_counts(&strategy).await?;
            if counts.is_empty() {
                println!("No dispatches recorded for {}.", strategy);
                return Ok(());
            }

            println!("\n{:<20} {:<12} {:>8}", "SUBSCRIBER", "OUTCOME", "COUNT");
            println!("{}", "-".repeat(42));
            for c in &counts {
                println!("{:<20} {:<12} {:>8}", truncate(&c.subscriber, 18), c.outcome, c.count);
            }

            println!("\n--- Last {} dispatches ---", limit);
            for d in ledger.recent_dispatches(&strategy, limit).await? {
                println!(
                    "  {} {:<12} {:<4} {:<12} {:<10} (x{}) {}",
                    d.recorded_at,
                    truncate(&d.subscriber, 12),
                    d.action,
                    d.instrument,
                    d.outcome,
                    d.attempts,
                    d.detail.as_deref().unwrap_or("")
                );
            }
        }

        Commands::Brokers => {
            println!("\n{:<12} {:<8} ALIASES", "BROKER", "REMOTE");
            println!("{}", "-".repeat(50));
            for kind in BrokerKind::ALL {
                println!(
                    "{:<12} {:<8} {}",
                    kind.key(),
                    if kind.is_remote() { "yes" } else { "no" },
                    kind.aliases().join(", ")
                );
            }
        }

        Commands::Platforms => {
            println!("\n{:<12} ALIASES", "PLATFORM");
            println!("{}", "-".repeat(40));
            for kind in PlatformKind::ALL {
                println!("{:<12} {}", kind.key(), kind.aliases().join(", "));
            }
        }
    }

    Ok(())
}

fn load_session(path: &Path) -> Result<SessionSettings> {
    SessionSettings::load(path).with_context(|| format!("failed to load session {}", path.display()))
}

async fn run_follow(settings: SessionSettings, ledger_override: Option<String>) -> Result<()> {
    let ledger = match ledger_override.or_else(|| settings.ledger.clone()) {
        Some(url) => Some(Arc::new(
            SignalLedger::new(&url)
                .await
                .with_context(|| format!("failed to open ledger {}", url))?,
        )),
        None => None,
    };

    let follower = follower(&settings.platform, settings.follower_options())
        .context("failed to create platform reader")?;
    let accounts = settings
        .build_accounts()
        .await
        .context("failed to set up subscribers")?;
    let subscriptions = accounts.iter().map(|a| a.subscription.clone()).collect();

    let handles = follower
        .follow_all(&settings.strategies, subscriptions, settings.follow.clone(), ledger)
        .await
        .context("failed to start following")?;

    println!("\n=== Strategy Mirror ===");
    println!("Platform:      {}", follower.kind());
    println!("Strategies:    {}", settings.strategies.join(", "));
    println!("Subscribers:   {}", accounts.len());
    println!("Poll interval: {}ms", settings.follow.poll_interval_ms);
    println!("\nPress Ctrl+C to stop.\n");

    wait_for_shutdown(&handles).await;

    for summary in stop_all(handles).await {
        print_summary(&summary);
    }

    for account in &accounts {
        if let Some(paper) = account.trader.as_paper() {
            println!("\n[{}]{}", account.subscription.label, paper.stats().await);
        }
    }

    Ok(())
}

/// Block until Ctrl+C or until every loop has exited by itself.
async fn wait_for_shutdown(handles: &[FollowHandle]) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Ctrl+C handler failed, stopping");
                }
                info!("Shutdown requested");
                return;
            }
            _ = ticker.tick() => {
                if handles.iter().all(FollowHandle::is_finished) {
                    warn!("All follow loops have exited");
                    return;
                }
            }
        }
    }
}

async fn stop_all(handles: Vec<FollowHandle>) -> Vec<SessionSummary> {
    let results = futures::future::join_all(handles.into_iter().map(|h| h.stop())).await;
    results
        .into_iter()
        .filter_map(|r| match r {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!(error = %e, "Follow task panicked");
                None
            }
        })
        .collect()
}

fn print_summary(summary: &SessionSummary) {
    println!("\n{:=^50}", format!(" {} ", summary.strategy_id));
    println!("Final State:     {}", summary.final_state.as_str());
    println!("{}", summary.stats);
    for (label, applied) in &summary.applied {
        println!("  {:<20} {} signals applied", truncate(label, 18), applied);
    }
    for (label, reason) in &summary.suspended {
        println!("  {:<20} SUSPENDED: {}", truncate(label, 18), reason);
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
