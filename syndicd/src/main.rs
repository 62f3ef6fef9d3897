//! syndicd - Background daemon for scheduled content distribution
//!
//! Recovers scheduler state from the database, then sweeps the queue for
//! distributions that are due and publishes them through the configured
//! platform publishers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use libsyndic::audit::SqliteAuditSink;
use libsyndic::events::{spawn_notification_forwarder, EventBus, TracingNotifier};
use libsyndic::platforms::mock::MockPublisher;
use libsyndic::platforms::{registry_from_config, PublisherRegistry};
use libsyndic::retry::RetryPolicy;
use libsyndic::tokens::{HttpTokenRefresher, TokenManager};
use libsyndic::{Config, Platform, Result, Scheduler, Store, SyndicError};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "syndicd")]
#[command(version)]
#[command(about = "Background daemon for scheduled content distribution")]
#[command(long_about = "\
syndicd - Background daemon for scheduled content distribution

DESCRIPTION:
    syndicd is a long-running daemon that publishes approved content to
    social platforms at its scheduled time.

    On startup it recovers scheduler state from the database: pending
    distributions get their timers back and attempts that were lost in a
    crash are fed back through the retry policy. It then sweeps the queue
    at a regular interval as a safety net behind the in-process timers.

USAGE:
    # Run in foreground (logs to stderr)
    syndicd

    # Run with custom sweep interval
    syndicd --sweep-interval 30

    # Process due distributions once and exit
    syndicd --once

    # Use mock publishers (no network calls)
    syndicd --mock

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current attempt)

CONFIGURATION:
    Configuration file: ~/.config/syndic/config.toml
    Database location: ~/.local/share/syndic/syndic.db

    [scheduler]
    sweep_interval_secs = 60
    in_flight_grace_secs = 300

    [platforms.meta]
    enabled = true
    api_base = \"https://graph.facebook.com/v19.0\"
    token_url = \"https://graph.facebook.com/oauth/access_token\"
    client_id = \"...\"
    client_secret = \"...\"

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error

For more information, visit: https://github.com/syndic-ops/syndic
")]
struct Cli {
    /// Sweep interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to sweep for due distributions (default: 60)")]
    sweep_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run once and exit (for testing)
    #[arg(long, hide = true)]
    #[arg(help = "Process due distributions once and exit (for testing)")]
    once: bool,

    /// Register mock publishers for every platform instead of real clients
    #[arg(long)]
    #[arg(help = "Use mock publishers; nothing leaves the machine")]
    mock: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = Config::load()?;
    let store = Store::new(&config.database.path).await?;

    info!("syndicd starting");

    let registry = Arc::new(build_registry(&config, cli.mock));
    let publishers = registry.all();
    if publishers.is_empty() {
        warn!("no publishers registered; enable platforms in the config or pass --mock");
    }
    for publisher in &publishers {
        info!(platform = %publisher.platform(), "publisher registered");
    }

    let tokens = Arc::new(TokenManager::new(
        store.clone(),
        Arc::new(HttpTokenRefresher::from_config(&config)),
        config.scheduler.token_refresh_margin_secs,
    ));
    let events = EventBus::default();
    let scheduler = Scheduler::new(
        store.clone(),
        registry,
        tokens,
        RetryPolicy::new(
            config.scheduler.min_backoff_secs,
            config.scheduler.max_backoff_secs,
        ),
        events.clone(),
        Arc::new(SqliteAuditSink::new(store)),
        config.scheduler.in_flight_grace_secs,
    );

    let forwarder = spawn_notification_forwarder(&events, Arc::new(TracingNotifier));
    scheduler.recover().await?;

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let sweep_interval = cli
        .sweep_interval
        .unwrap_or(config.scheduler.sweep_interval_secs);
    info!("Sweep interval: {}s", sweep_interval);

    if cli.once {
        let picked = scheduler
            .dispatch_due(chrono::Utc::now().timestamp())
            .await?;
        info!("syndicd: processed {} due distribution(s), exiting", picked);
    } else {
        run_daemon_loop(&scheduler, sweep_interval, shutdown).await?;
    }

    scheduler.shutdown_timers();
    forwarder.abort();
    info!("syndicd stopped");
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    if verbose {
        libsyndic::logging::init("debug");
    } else {
        libsyndic::logging::init_default();
    }
}

/// Build the publisher registry from the enabled platform sections
fn build_registry(config: &Config, mock: bool) -> PublisherRegistry {
    if mock {
        let mut registry = PublisherRegistry::new();
        for platform in [
            Platform::Meta,
            Platform::X,
            Platform::LinkedIn,
            Platform::Instagram,
            Platform::TikTok,
        ] {
            registry.register(Arc::new(MockPublisher::always_succeeding(platform)));
        }
        info!("mock publishers registered for all platforms");
        return registry;
    }

    registry_from_config(config)
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| SyndicError::Validation(format!("Signal setup failed: {}", e)))?;

    let shutdown_clone = shutdown.clone();
    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown_clone.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}

/// Main daemon loop
async fn run_daemon_loop(
    scheduler: &Scheduler,
    sweep_interval: u64,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        match scheduler.dispatch_due(chrono::Utc::now().timestamp()).await {
            Ok(0) => {}
            Ok(picked) => info!("sweep picked up {} due distribution(s)", picked),
            Err(e) => error!("Error dispatching due distributions: {}", e),
        }

        // Sleep until next sweep (check shutdown every second)
        for _ in 0..sweep_interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }

    Ok(())
}
