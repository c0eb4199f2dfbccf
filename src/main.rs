//! Daemon entry point
//!
//! Wires the durable store, bucket set, controller and synchronizer
//! together, runs installation and activation, then serves caching
//! commands until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use vitacache::cache::BucketSet;
use vitacache::config::Config;
use vitacache::controller::{CacheController, Command};
use vitacache::lifecycle::Lifecycle;
use vitacache::logging;
use vitacache::net::{Connectivity, Fetcher, HttpFetcher};
use vitacache::store::DurableStore;
use vitacache::sync::Synchronizer;

#[derive(Parser, Debug)]
#[command(name = "vitacache", about = "Offline-first caching daemon", version)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(short, long)]
    test: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.json_logs {
        logging::init_json_subscriber()
    } else {
        logging::init_subscriber()
    }
    .map_err(|e| anyhow::anyhow!(e))?;

    let config = if args.config.exists() {
        Config::from_file(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        info!(path = %args.config.display(), "no config file, using defaults");
        Config::default()
    };

    if args.test {
        config.validate()?;
        println!("configuration ok");
        return Ok(());
    }

    let config = Arc::new(config);
    info!(version = %config.version, store = %config.store_path, "starting");

    let store = DurableStore::open(std::path::Path::new(&config.store_path))
        .context("opening durable store")?;
    let connectivity = Connectivity::new(true);
    let fetcher: Arc<dyn Fetcher> = Arc::new(
        HttpFetcher::new(
            connectivity.clone(),
            config.origin.clone(),
            std::time::Duration::from_secs(config.fetch_timeout_secs),
        )
        .context("building HTTP client")?,
    );

    let buckets = BucketSet::new(config.version.clone());
    let lifecycle = Arc::new(Mutex::new(Lifecycle::new()));
    let controller = CacheController::new(
        store.clone(),
        buckets,
        fetcher.clone(),
        config.clone(),
        lifecycle.clone(),
    );

    let report = controller.install().await.context("installation failed")?;
    info!(
        cached = report.cached,
        placeholders = report.placeholders,
        "install pre-caching done"
    );

    if !lifecycle.lock().is_active() {
        controller.activate().await.context("activation failed")?;
    }

    let synchronizer = Synchronizer::new(store, fetcher);
    let watcher = synchronizer.spawn_watcher(&connectivity);

    // Log every broadcast event for operators
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(?event, "event");
        }
    });

    let (command_tx, command_rx) = mpsc::channel::<Command>(32);
    let command_loop = tokio::spawn(controller.serve(command_rx));

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");

    drop(command_tx);
    if let Err(err) = command_loop.await {
        warn!(error = %err, "command loop did not shut down cleanly");
    }
    watcher.abort();

    Ok(())
}
