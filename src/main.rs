//! cardgrab - Automatic ingestion of removable media cards
//!
//! Main entry point for the daemon.
//!
//! # Overview
//!
//! This binary crate wires the library components into a long-running
//! service. It initializes:
//! - Logging infrastructure (daily file rotation, optional console echo)
//! - Tokio async runtime (4 worker threads for subprocess execution and I/O)
//! - Configuration loading and live reload ([`ConfigStore`] + file watcher)
//! - The device monitor feeding the [`DeviceEventRouter`]
//! - The [`IngestionPipeline`] each accepted card runs through
//! - Optional Home Assistant state notifications
//!
//! # Execution Flow
//!
//! 1. Resolve and load the configuration file (creating a default one if
//!    the given `.yaml` path does not exist yet)
//! 2. Initialize logging → logs/cardgrab.<date>
//! 3. Start the notifier (when configured) and publish the Ready state
//! 4. Start the config-file watcher (debounced reload)
//! 5. Start the device monitor and the event router
//! 6. Wait for Ctrl-C, then stop the router and log a metrics summary
//!
//! # Configuration
//!
//! The config path comes from `--config`/`-c` or the `CARDGRAB_CONFIG_PATH`
//! environment variable, defaulting to `cardgrab.yaml` in the working
//! directory. A directory path means "look for cardgrab.yaml inside it".
//!
//! # Platform
//!
//! Linux only: relies on `/dev` partition nodes and the `mount`,
//! `umount`, `blkid`, `chown` and `mediainfo` utilities.

use anyhow::Result;
use camino::Utf8PathBuf;
use cardgrab::config::watch::spawn_config_watcher;
use cardgrab::notifier::{spawn_notifier, HomeAssistantNotifier};
use cardgrab::router::monitor::spawn_device_monitor;
use cardgrab::{
    ConfigStore, DeviceEventRouter, IngestContext, IngestionPipeline, APP_NAME, VERSION,
};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about = "Removable-media card ingestion daemon")]
struct Args {
    /// Path to the configuration file, or a directory containing one
    #[arg(
        short = 'c',
        long = "config",
        env = "CARDGRAB_CONFIG_PATH",
        default_value = "cardgrab.yaml"
    )]
    config: Utf8PathBuf,

    /// Echo log output to the console as well as the log file
    #[arg(long)]
    console: bool,
}

/// Main entry point for the cardgrab daemon
///
/// Builds the tokio runtime, runs the service until Ctrl-C and shuts the
/// runtime down with a bounded grace period.
///
/// # Returns
///
/// - `Ok(())` if the daemon ran and exited normally
/// - `Err(_)` if initialization failed
///
/// # Errors
///
/// This function can fail if:
/// - The configuration file is missing, unreadable or invalid YAML
/// - Logging initialization fails (disk space, permissions)
/// - Tokio runtime creation fails (system resources)
/// - The config or device watcher cannot be registered
fn main() -> Result<()> {
    let args = Args::parse();

    // Create tokio runtime for async operations
    // This will handle subprocess execution and other I/O operations
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("cardgrab-worker")
        .build()?;

    let result = runtime.block_on(run(args));

    // Shutdown the tokio runtime gracefully
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));

    result
}

async fn run(args: Args) -> Result<()> {
    // Config comes first: the log level lives in it
    let store = Arc::new(ConfigStore::open(&args.config)?);
    let config = store.config();

    let _log_guard =
        cardgrab::logging::setup_logging("logs", APP_NAME, &config.log_level, args.console)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    tracing::debug!("Configuration: {:?}", config);

    let ctx = IngestContext::new(Arc::clone(&store));

    // The notifier must subscribe before the first publish to see it
    if let Some(ha_config) = &config.home_assistant {
        let states = ctx.state.subscribe();
        spawn_notifier(
            HomeAssistantNotifier::new(ha_config),
            states,
            Arc::clone(&ctx.metrics),
        );
    }
    ctx.publish_state();

    let _config_watcher = spawn_config_watcher(Arc::clone(&store))?;

    let (device_tx, device_rx) = mpsc::channel(64);
    let _device_monitor = spawn_device_monitor(device_tx)?;

    let pipeline = Arc::new(IngestionPipeline::new(ctx.clone()));
    let router = DeviceEventRouter::new(pipeline, Arc::clone(&ctx.active));
    let router_task = tokio::spawn(router.run(device_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Stopping monitor...");

    router_task.abort();
    ctx.metrics.log_summary();
    tracing::info!("Done.");

    Ok(())
}
