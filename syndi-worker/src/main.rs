//! syndi-worker - Background worker for scheduled publishing
//!
//! Polls the durable queue, claims due jobs, and runs each publish
//! pipeline: token refresh, platform call, state commit, notification
//! fanout. Also sweeps expiring OAuth tokens so refreshes happen ahead
//! of need instead of on the publish path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use libsyndicast::logging::{self, LogFormat};
use libsyndicast::notify::{NoopPush, NotificationFanout, WebhookSender};
use libsyndicast::platforms::AdapterRegistry;
use libsyndicast::{
    Config, Database, PublishScheduler, Result, SyndicastError, TokenLifecycleManager, TokenVault,
};

/// How many poll cycles pass between proactive token refresh sweeps.
const SWEEP_EVERY_POLLS: u64 = 10;

#[derive(Parser, Debug)]
#[command(name = "syndi-worker")]
#[command(version)]
#[command(about = "Background worker for scheduled publishing")]
#[command(long_about = "\
syndi-worker - Background worker for scheduled publishing

DESCRIPTION:
    syndi-worker is a long-running daemon that polls the Syndicast queue
    and publishes scheduled posts when they come due.

    Each due job is claimed with a visibility timeout, so several workers
    can run against the same database without double-publishing. Failed
    attempts are retried with exponential backoff up to the configured
    cap, then the post is marked failed and its owner notified.

USAGE:
    # Run in foreground (logs to stderr)
    syndi-worker

    # Run with custom poll interval
    syndi-worker --poll-interval 30

    # Process due jobs once and exit
    syndi-worker --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes in-flight publishes)

CONFIGURATION:
    Configuration file: ~/.config/syndicast/config.toml

    [scheduler]
    poll_interval = 60            # seconds between polls
    retry_cap = 3                 # failed attempts before terminal failure
    backoff_base_secs = 60        # first retry delay, doubling after
    visibility_timeout_secs = 300 # claim window for crashed workers
    workers = 4                   # concurrent publishes per process

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Authentication error
    3 - Invalid input
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log output format: text, json, or pretty
    #[arg(long, env = "SYNDICAST_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Process due jobs once and exit (for testing)
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_daemon(cli.log_format, cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    let vault_config = config.vault.as_ref().ok_or_else(|| {
        SyndicastError::InvalidInput(
            "missing [vault] section: a passphrase file is required".to_string(),
        )
    })?;
    let vault = TokenVault::from_passphrase_file(&vault_config.expand_passphrase_file_path()?)?;

    let registry = AdapterRegistry::from_config(&config)?;
    let tokens = Arc::new(TokenLifecycleManager::new(
        db.clone(),
        vault,
        registry.clone(),
        config.tokens.refresh_buffer_secs,
    ));
    let fanout = Arc::new(NotificationFanout::new(
        db.clone(),
        WebhookSender::new(Duration::from_secs(config.webhooks.attempt_timeout_secs)),
        Arc::new(NoopPush),
    ));
    let scheduler = PublishScheduler::new(
        db,
        tokens.clone(),
        registry,
        fanout,
        config.scheduler.clone(),
    );

    info!("syndi-worker starting");

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let poll_interval = cli.poll_interval.unwrap_or(config.scheduler.poll_interval);
    info!(poll_interval, "poll interval set");

    if cli.once {
        let claimed = scheduler.poll_once().await?;
        info!(claimed, "processed due jobs once, exiting");
        return Ok(());
    }

    let mut polls: u64 = 0;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("shutdown requested, stopping worker loop");
            break;
        }

        match scheduler.poll_once().await {
            Ok(0) => {}
            Ok(claimed) => info!(claimed, "poll cycle complete"),
            Err(e) => error!(error = %e, "poll cycle failed"),
        }

        polls += 1;
        if polls % SWEEP_EVERY_POLLS == 0 {
            match tokens.refresh_all_expiring().await {
                Ok(sweep) if !sweep.refreshed.is_empty() || !sweep.failed.is_empty() => {
                    info!(
                        refreshed = sweep.refreshed.len(),
                        failed = sweep.failed.len(),
                        "token refresh sweep"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "token refresh sweep failed"),
            }
        }

        // Sleep until next poll, checking for shutdown every second
        for _ in 0..poll_interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }

    info!("syndi-worker stopped");
    Ok(())
}

fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| SyndicastError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("received shutdown signal, stopping gracefully");
                    shutdown.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}
