use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use common::{UpdateError, WallpaperMode};

use crate::cache::CacheStore;
use crate::display::{DisplayApplier, DisplayServer};
use crate::fetcher::{HttpTransport, RetryingFetcher};
use crate::scheduler::Scheduler;
use crate::store::KvStore;

const MODE_KEY: &str = "WallpaperMode";

/// What became of a [`Orchestrator::try_update`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The full fetch-cache-apply sequence ran to completion.
    Applied,
    /// Another update was in flight; this call was dropped, not queued.
    Skipped,
}

/// Clears the in-flight flag on every exit path, including panics.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Composes fetcher, cache and applier into the one update pipeline,
/// guaranteeing at most one update executes at a time.
///
/// Duplicate requests during an update are dropped; callers that need the
/// eventual result re-invoke later. The orchestrator never reinterprets
/// errors: the first taxonomy value a component reports is passed through
/// to the caller and recorded as the current error state.
pub struct Orchestrator<T: HttpTransport, D: DisplayServer, S: KvStore> {
    fetcher: RetryingFetcher<T>,
    cache: CacheStore,
    applier: DisplayApplier<D>,
    scheduler: Arc<Scheduler<S>>,
    store: Arc<S>,
    updating: AtomicBool,
    last_error: Mutex<Option<UpdateError>>,
}

impl<T, D, S> Orchestrator<T, D, S>
where
    T: HttpTransport,
    D: DisplayServer,
    S: KvStore + 'static,
{
    pub fn new(
        fetcher: RetryingFetcher<T>,
        cache: CacheStore,
        applier: DisplayApplier<D>,
        scheduler: Arc<Scheduler<S>>,
        store: Arc<S>,
    ) -> Self {
        Self {
            fetcher,
            cache,
            applier,
            scheduler,
            store,
            updating: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn display_server(&self) -> &D {
        self.applier.server()
    }

    /// The persisted fan-out mode, defaulting to [`WallpaperMode::Same`].
    pub fn mode(&self) -> WallpaperMode {
        self.store
            .get(MODE_KEY)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    /// Persist a new mode, then refresh immediately.
    ///
    /// The refresh goes through the single-flight guard: if an update is
    /// already in flight it reports [`UpdateOutcome::Skipped`], but the new
    /// mode is persisted regardless and takes effect on the next update.
    pub async fn set_mode(&self, mode: WallpaperMode) -> Result<UpdateOutcome, UpdateError> {
        self.store.set(MODE_KEY, mode.as_str());
        log::info!("Wallpaper mode set to {}", mode);
        self.try_update().await
    }

    /// Run one fetch-cache-apply sequence, unless one is already running.
    ///
    /// Long-running: with retries the network phase alone may take
    /// `retry_delay * (max_retry_attempts + 1)` plus request timeouts.
    /// There is no mid-flight cancellation.
    pub async fn try_update(&self) -> Result<UpdateOutcome, UpdateError> {
        if self
            .updating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::info!("Update already in flight, dropping request");
            return Ok(UpdateOutcome::Skipped);
        }
        let _guard = InFlightGuard(&self.updating);

        log::info!("Starting wallpaper update ({} mode)", self.mode());
        let result = self
            .applier
            .apply(self.mode(), || self.fetch_and_cache())
            .await;

        match &result {
            Ok(()) => {
                self.scheduler.record_success();
                *self.last_error.lock().unwrap() = None;
                log::info!("Wallpaper update completed");
            }
            Err(e) => {
                *self.last_error.lock().unwrap() = Some(e.clone());
                log::error!("Wallpaper update failed: {}", e);
            }
        }

        result.map(|()| UpdateOutcome::Applied)
    }

    /// One metadata fetch, image download and cache write.
    async fn fetch_and_cache(&self) -> Result<PathBuf, UpdateError> {
        let descriptor = self.fetcher.fetch_metadata().await?;
        let bytes = self.fetcher.fetch_bytes(&descriptor.image_url).await?;
        self.cache.save(&descriptor.id, &bytes)
    }

    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::SeqCst)
    }

    /// The error captured by the most recent failed update, if the update
    /// after it has not succeeded yet.
    pub fn last_error(&self) -> Option<UpdateError> {
        self.last_error.lock().unwrap().clone()
    }
}
