use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::UpdateInterval;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::store::KvStore;

/// How often a running scheduler re-evaluates whether an update is due.
///
/// Independent of (and typically much shorter than) the configured update
/// interval: the scheduler is a polling loop, not a one-shot timer armed to
/// the interval itself.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(60);

const INTERVAL_KEY: &str = "UpdateInterval";
const LAST_UPDATE_KEY: &str = "LastWallpaperUpdate";

/// A due-update request, sent fire-and-forget to the orchestrator's drain
/// task.
#[derive(Debug, Clone, Copy)]
pub struct UpdateRequest;

struct Ticker {
    task: JoinHandle<()>,
    requests: mpsc::UnboundedSender<UpdateRequest>,
}

/// Periodic tick loop deciding when a wallpaper update is due.
///
/// Two logical states: Idle (no tick task) and Running (one armed tick
/// task). The loop only ever *requests* updates over a channel; stopping it
/// aborts the loop task and nothing else, so an update already in flight is
/// never cancelled. The last-success timestamp and the configured interval
/// live in the injected [`KvStore`]; stored interval values are trusted
/// as-is, clamping happens at the producers.
pub struct Scheduler<S: KvStore> {
    store: Arc<S>,
    check_interval: Duration,
    ticker: Mutex<Option<Ticker>>,
}

impl<S: KvStore + 'static> Scheduler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            check_interval: CHECK_INTERVAL,
            ticker: Mutex::new(None),
        }
    }

    /// Override the polling cadence, for tests.
    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// The configured update interval, defaulting to 24 hours.
    pub fn interval(&self) -> UpdateInterval {
        stored_interval(&*self.store)
    }

    /// Persist a new interval; a running tick loop is restarted so the next
    /// due-check already uses it.
    pub fn set_interval(&self, interval: UpdateInterval) {
        let json = serde_json::to_string(&interval).expect("interval is serializable");
        self.store.set(INTERVAL_KEY, &json);
        log::info!("Update interval set to {}", interval);

        let running = {
            let mut ticker = self.ticker.lock().unwrap();
            ticker.take().map(|t| {
                t.task.abort();
                t.requests
            })
        };

        if let Some(requests) = running {
            self.start(requests);
        }
    }

    /// Timestamp of the last fully successful update.
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        stored_last_success(&*self.store)
    }

    /// Record now as the last successful update.
    ///
    /// Called only after fetch, cache and apply all succeeded; a failed
    /// update leaves the timestamp alone so the next tick retries.
    pub fn record_success(&self) {
        self.store.set(LAST_UPDATE_KEY, &Utc::now().to_rfc3339());
    }

    /// True when enough wall-clock time has elapsed since the last
    /// successful update, or when there has never been one.
    pub fn is_due(&self) -> bool {
        is_due_at(&*self.store, Utc::now())
    }

    /// Seconds until the next update is due; zero when overdue, `None` when
    /// there has never been a successful update.
    pub fn due_in_secs(&self) -> Option<u64> {
        let last = self.last_success()?;
        let due_at = last + chrono::Duration::seconds(self.interval().total_seconds() as i64);
        let remaining = due_at - Utc::now();
        Some(remaining.num_seconds().max(0) as u64)
    }

    pub fn is_running(&self) -> bool {
        self.ticker.lock().unwrap().is_some()
    }

    /// Arm the tick loop.
    ///
    /// If already running the old loop is stopped first, so restarting is
    /// idempotent and two loops never coexist. An update is requested
    /// immediately when one is already due.
    pub fn start(&self, requests: mpsc::UnboundedSender<UpdateRequest>) {
        let mut ticker = self.ticker.lock().unwrap();
        if let Some(old) = ticker.take() {
            old.task.abort();
        }

        if self.is_due() {
            let _ = requests.send(UpdateRequest);
        }

        let store = Arc::clone(&self.store);
        let check_interval = self.check_interval;
        let loop_requests = requests.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(check_interval).await;
                if is_due_at(&*store, Utc::now()) && loop_requests.send(UpdateRequest).is_err() {
                    // Receiver gone, the daemon is shutting down.
                    break;
                }
            }
        });

        *ticker = Some(Ticker { task, requests });
        log::info!(
            "Background updates armed (interval {}, check every {:?})",
            self.interval(),
            self.check_interval
        );
    }

    /// Cancel the tick loop. Idempotent; an in-flight update is unaffected.
    pub fn stop(&self) {
        if let Some(ticker) = self.ticker.lock().unwrap().take() {
            ticker.task.abort();
            log::info!("Background updates stopped");
        }
    }
}

fn stored_interval<S: KvStore>(store: &S) -> UpdateInterval {
    store
        .get(INTERVAL_KEY)
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default()
}

fn stored_last_success<S: KvStore>(store: &S) -> Option<DateTime<Utc>> {
    store
        .get(LAST_UPDATE_KEY)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn is_due_at<S: KvStore>(store: &S, now: DateTime<Utc>) -> bool {
    match stored_last_success(store) {
        None => true,
        Some(last) => {
            let elapsed = now - last;
            elapsed.num_seconds() >= stored_interval(store).total_seconds() as i64
        }
    }
}
