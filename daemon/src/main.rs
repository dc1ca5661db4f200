mod cache;
mod config;
mod display;
mod fetcher;
mod ipc_server;
mod macros;
mod orchestrator;
mod scheduler;
mod store;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cache::CacheStore;
use crate::display::{DisplayApplier, DisplayServer, SystemDisplayServer};
use crate::fetcher::{HttpTransport, ReqwestTransport, RetryingFetcher};
use crate::orchestrator::Orchestrator;
use crate::scheduler::{Scheduler, UpdateRequest};
use crate::store::{JsonFileStore, KvStore};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match config::Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load config: {e:#}. Using defaults.");
            config::Config::default()
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.general.log_level),
    )
    .init();

    log::info!(
        "Starting Mural Wallpaper Daemon v{}",
        env!("CARGO_PKG_VERSION")
    );
    log::info!("  Server: {}", config.server.base_url);
    log::info!(
        "  Request timeout: {}s",
        config.server.request_timeout_secs
    );

    let store = Arc::new(
        JsonFileStore::open(config::Config::default_state_path()?)
            .context("Failed to open daemon state")?,
    );

    let transport = ReqwestTransport::new(Duration::from_secs(config.server.request_timeout_secs))
        .context("Failed to build HTTP client")?;
    let fetcher = RetryingFetcher::new(transport, &config.server.base_url);

    // Construction also clears out cache entries a previous process
    // lifetime left behind.
    let cache = CacheStore::new(config.cache_dir()?).context("Failed to open wallpaper cache")?;
    log::info!("  Cache directory: {}", cache.dir().display());

    let scheduler = Arc::new(Scheduler::new(Arc::clone(&store)));
    let applier = DisplayApplier::new(SystemDisplayServer);
    let orchestrator = Orchestrator::new(fetcher, cache, applier, Arc::clone(&scheduler), store);

    let (update_tx, mut update_rx) = mpsc::unbounded_channel();
    let daemon = Arc::new(Daemon {
        orchestrator,
        scheduler: Arc::clone(&scheduler),
        update_tx: update_tx.clone(),
        start_time: std::time::Instant::now(),
    });

    // Drain scheduler requests. Each update runs in its own task, so
    // stopping the scheduler never aborts one already in flight; duplicates
    // are dropped by the orchestrator's single-flight guard.
    let drain_daemon = daemon.clone();
    tokio::spawn(async move {
        while update_rx.recv().await.is_some() {
            let daemon = drain_daemon.clone();
            tokio::spawn(async move {
                crate::log_and_continue!(
                    daemon.orchestrator.try_update().await,
                    "run scheduled update"
                );
            });
        }
    });

    scheduler.start(update_tx);

    // Start IPC server
    let ipc_daemon = daemon.clone();
    let mut ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server::start(ipc_daemon).await {
            log::error!("IPC server error: {}", e);
        }
    });

    // Set up signal handlers
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    tokio::select! {
        _ = &mut ipc_handle => {
            log::info!("IPC server stopped");
        }
        _ = sigterm.recv() => {
            log::info!("Received SIGTERM, shutting down...");
        }
        _ = sigint.recv() => {
            log::info!("Received SIGINT, shutting down...");
        }
    }

    daemon.scheduler.stop();
    ipc_handle.abort();
    let _ = std::fs::remove_file(common::get_socket_path());

    log::info!("Daemon shutting down");
    Ok(())
}

/// Shared daemon state handed to the IPC server.
pub struct Daemon<T: HttpTransport, D: DisplayServer, S: KvStore> {
    pub orchestrator: Orchestrator<T, D, S>,
    pub scheduler: Arc<Scheduler<S>>,
    pub update_tx: mpsc::UnboundedSender<UpdateRequest>,
    pub start_time: std::time::Instant,
}

impl<T, D, S> Daemon<T, D, S>
where
    T: HttpTransport,
    D: DisplayServer,
    S: KvStore + 'static,
{
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
