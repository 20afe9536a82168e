//! Batch analysis over the whole catalog.
//!
//! One session holds the persisted session slot at a time. The run loop pulls
//! a page from the catalog, classifies it on a bounded worker pool, writes the
//! records, and only then checkpoints the cursor, so a crash costs at most one
//! page of rework.

use crate::catalog::{AssetPage, Catalog, Cursor};
use crate::core::asset::Asset;
use crate::core::category::Category;
use crate::core::classifier::{ClassificationRecord, Classifier, DEFAULT_PIXEL_TIMEOUT};
use crate::database::{ResultsStore, SessionState, SessionStatus, StoreError};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Another analysis session is already {status}")]
    Conflict { status: SessionStatus },

    #[error("Cannot {action} a session that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: SessionStatus,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub page_size: usize,
    pub workers: usize,
    pub pixel_timeout: Duration,
    /// Extra attempts for a failed store write before the run fails.
    pub store_retries: u32,
    pub retry_backoff: Duration,
    /// Active sessions without a heartbeat for this long may be taken over.
    pub stale_after: chrono::Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            workers: num_cpus::get(),
            pixel_timeout: DEFAULT_PIXEL_TIMEOUT,
            store_retries: 3,
            retry_backoff: Duration::from_millis(250),
            stale_after: chrono::Duration::seconds(300),
        }
    }
}

/// Read-only view of a session for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: SessionStatus,
    pub processed: u64,
    pub total: Option<u64>,
    pub errored: u64,
    pub categorized: BTreeMap<Category, u64>,
    pub cursor: Cursor,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    pub fn from_state(state: &SessionState, total: Option<u64>) -> Self {
        Self {
            status: state.status,
            processed: state.counts.processed,
            total,
            errored: state.counts.errored,
            categorized: state.counts.categorized.clone(),
            cursor: state.cursor.clone(),
            last_error: state.last_error.clone(),
            started_at: state.started_at,
            ended_at: state.ended_at,
        }
    }
}

struct Progress {
    state: SessionState,
    total: Option<u64>,
}

/// State shared between the session handle and its run loop.
struct Shared {
    progress: Mutex<Progress>,
    status_tx: watch::Sender<SessionStatus>,
    cancel: AtomicBool,
    pause: AtomicBool,
    wake: Notify,
}

impl Shared {
    fn new() -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        Self {
            progress: Mutex::new(Progress {
                state: SessionState::default(),
                total: None,
            }),
            status_tx,
            cancel: AtomicBool::new(false),
            pause: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    fn snapshot(&self) -> StatusSnapshot {
        let progress = self.lock();
        StatusSnapshot::from_state(&progress.state, progress.total)
    }

    fn commit(&self, state: SessionState) {
        let status = state.status;
        self.lock().state = state;
        self.status_tx.send_replace(status);
    }

    fn begin(&self, state: SessionState, total: Option<u64>) {
        self.cancel.store(false, Ordering::SeqCst);
        self.pause.store(false, Ordering::SeqCst);
        self.lock().total = total;
        self.commit(state);
    }
}

pub struct AnalysisSession {
    catalog: Arc<dyn Catalog>,
    store: Arc<dyn ResultsStore>,
    classifier: Arc<Classifier>,
    options: SessionOptions,
    owner: Uuid,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
    progress_sender: Option<mpsc::UnboundedSender<StatusSnapshot>>,
}

impl AnalysisSession {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        store: Arc<dyn ResultsStore>,
        mut options: SessionOptions,
    ) -> Self {
        options.page_size = options.page_size.max(1);
        options.workers = options.workers.max(1);
        let classifier =
            Classifier::new(Arc::clone(&catalog)).with_pixel_timeout(options.pixel_timeout);
        Self {
            catalog,
            store,
            classifier: Arc::new(classifier),
            options,
            owner: Uuid::new_v4(),
            shared: Arc::new(Shared::new()),
            task: Mutex::new(None),
            progress_sender: None,
        }
    }

    /// Receives a snapshot after every checkpoint and state change.
    pub fn with_progress_sender(mut self, sender: mpsc::UnboundedSender<StatusSnapshot>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    /// Claims the session slot and spawns the run loop.
    ///
    /// With `resume`, a previous run that did not reach the end of the
    /// catalog continues from its checkpoint; otherwise analysis restarts at
    /// the head of the catalog.
    pub async fn start(&self, resume: bool) -> Result<(), SessionError> {
        let local = self.shared.state().status;
        if local.is_active() {
            return Err(SessionError::Conflict { status: local });
        }

        // Refuse a live run owned by another session
        let existing = run_blocking(&self.store, |store| store.get_session_state()).await?;
        let now = Utc::now();

        if let Some(current) = &existing {
            if current.status.is_active() {
                if !current.is_stale(now, self.options.stale_after) {
                    return Err(SessionError::Conflict {
                        status: current.status,
                    });
                }
                log::warn!(
                    "Taking over stale {} session (owner {:?}, last heartbeat {:?})",
                    current.status,
                    current.owner,
                    current.heartbeat_at
                );
            }
        }

        let carried = existing
            .as_ref()
            .filter(|state| resume && state.is_resumable());
        let next = SessionState {
            status: SessionStatus::Running,
            cursor: carried.map(|s| s.cursor.clone()).unwrap_or_default(),
            counts: carried.map(|s| s.counts.clone()).unwrap_or_default(),
            started_at: Some(now),
            ended_at: None,
            last_error: None,
            owner: Some(self.owner),
            heartbeat_at: Some(now),
            revision: existing.as_ref().map_or(1, |s| s.revision + 1),
        };

        // Claim the slot
        let expected = existing.as_ref().map(|s| s.revision);
        let claim = next.clone();
        let claimed = run_blocking(&self.store, move |store| {
            store.compare_and_swap_session(expected, &claim)
        })
        .await?;
        if !claimed {
            return Err(SessionError::Conflict {
                status: SessionStatus::Running,
            });
        }

        let total = match self.catalog.count_assets().await {
            Ok(total) => total,
            Err(e) => {
                log::warn!("Could not count catalog assets: {}", e);
                None
            }
        };

        log::info!(
            "Analysis session {} started at {} (resume: {})",
            self.owner,
            next.cursor,
            resume
        );
        self.shared.begin(next, total);

        let runner = Runner {
            catalog: Arc::clone(&self.catalog),
            store: Arc::clone(&self.store),
            classifier: Arc::clone(&self.classifier),
            shared: Arc::clone(&self.shared),
            options: self.options.clone(),
            progress_sender: self.progress_sender.clone(),
        };
        let handle = tokio::spawn(runner.run());
        *self.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(())
    }

    /// The run loop finishes its current page, then parks.
    pub fn pause(&self) -> Result<(), SessionError> {
        let status = self.shared.state().status;
        if status != SessionStatus::Running {
            return Err(SessionError::InvalidTransition {
                action: "pause",
                status,
            });
        }
        self.shared.pause.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        let status = self.shared.state().status;
        let pausing = self.shared.pause.load(Ordering::SeqCst);
        if status != SessionStatus::Paused && !pausing {
            return Err(SessionError::InvalidTransition {
                action: "resume",
                status,
            });
        }
        self.shared.pause.store(false, Ordering::SeqCst);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Stops the run between assets. The last checkpoint is kept so a later
    /// `start(true)` continues from it.
    pub fn cancel(&self) -> Result<(), SessionError> {
        let status = self.shared.state().status;
        if !status.is_active() {
            return Err(SessionError::InvalidTransition {
                action: "cancel",
                status,
            });
        }
        self.shared.cancel.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
        Ok(())
    }

    pub fn status(&self) -> StatusSnapshot {
        self.shared.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Waits for the run loop to exit.
    pub async fn wait(&self) -> Result<StatusSnapshot, SessionError> {
        let handle = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            handle.await?;
        }
        Ok(self.status())
    }
}

async fn run_blocking<T, F>(store: &Arc<dyn ResultsStore>, op: F) -> Result<T, StoreError>
where
    F: FnOnce(&dyn ResultsStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
}

/// Three heartbeats fit in one staleness window.
fn heartbeat_period(stale_after: chrono::Duration) -> Duration {
    (stale_after / 3)
        .to_std()
        .unwrap_or(Duration::from_secs(60))
        .max(MIN_HEARTBEAT)
}

/// Doubles per attempt, starting at `base` for the first retry.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

struct Runner {
    catalog: Arc<dyn Catalog>,
    store: Arc<dyn ResultsStore>,
    classifier: Arc<Classifier>,
    shared: Arc<Shared>,
    options: SessionOptions,
    progress_sender: Option<mpsc::UnboundedSender<StatusSnapshot>>,
}

impl Runner {
    async fn run(self) {
        loop {
            if self.shared.cancel.load(Ordering::SeqCst) {
                return self.finish(SessionStatus::Cancelled, None).await;
            }
            if self.shared.pause.load(Ordering::SeqCst) && !self.park().await {
                return;
            }
            if self.shared.cancel.load(Ordering::SeqCst) {
                continue;
            }

            // Fetch the next page
            let cursor = self.shared.state().cursor;
            let page = match self.catalog.list_assets(&cursor, self.options.page_size).await {
                Ok(page) => page,
                Err(e) => {
                    log::error!("Catalog listing failed at {}: {}", cursor, e);
                    return self.finish(SessionStatus::Failed, Some(e.to_string())).await;
                }
            };
            let AssetPage {
                assets,
                next_cursor,
                has_more,
            } = page;

            // A page that moves nothing forward would be listed again forever
            if has_more && (assets.is_empty() || next_cursor == cursor) {
                let message = format!("Catalog made no progress at {}", cursor);
                log::error!("{}", message);
                return self.finish(SessionStatus::Failed, Some(message)).await;
            }

            let listed = assets.len();
            let Some(records) = self.classify_with_heartbeat(assets).await else {
                return;
            };
            let records = Arc::new(records);

            // Records go to the store before the cursor moves past them
            if !records.is_empty() {
                let batch = Arc::clone(&records);
                if let Err(e) = self
                    .retrying("record write", move |store| store.upsert_batch(&batch))
                    .await
                {
                    log::error!("Giving up on record write at {}: {}", cursor, e);
                    let message = format!("Store write failed: {}", e);
                    return self.finish(SessionStatus::Failed, Some(message)).await;
                }
            }

            // only cancellation leaves a page partly classified
            if records.len() < listed {
                return self.finish(SessionStatus::Cancelled, None).await;
            }

            // Counts and cursor advance together
            let mut next = self.shared.state();
            for record in records.iter() {
                next.counts.record(record);
            }
            next.cursor = next_cursor.clone();
            match self.checkpoint(next).await {
                Ok(true) => {}
                Ok(false) => return self.abandon(),
                Err(e) => {
                    let message = format!("Checkpoint failed: {}", e);
                    return self.finish(SessionStatus::Failed, Some(message)).await;
                }
            }
            log::debug!("Checkpoint at {} ({} records)", next_cursor, records.len());
            self.report();

            if !has_more {
                return self.finish(SessionStatus::Completed, None).await;
            }
        }
    }

    /// Classifies up to `workers` assets at once. Stops handing out assets
    /// once cancellation is requested and returns the classified prefix.
    async fn classify_page(&self, assets: Vec<Asset>) -> Vec<ClassificationRecord> {
        let results: Vec<Option<ClassificationRecord>> = stream::iter(assets)
            .map(|asset| {
                let classifier = Arc::clone(&self.classifier);
                let shared = Arc::clone(&self.shared);
                async move {
                    if shared.cancel.load(Ordering::SeqCst) {
                        None
                    } else {
                        Some(classifier.classify(&asset).await)
                    }
                }
            })
            .buffered(self.options.workers)
            .collect()
            .await;

        results.into_iter().map_while(|record| record).collect()
    }

    /// Classifies a page while keeping the heartbeat fresh, so a slow page
    /// does not make the run look crashed. Returns `None` when the run has
    /// already been stopped.
    async fn classify_with_heartbeat(&self, assets: Vec<Asset>) -> Option<Vec<ClassificationRecord>> {
        let work = self.classify_page(assets);
        tokio::pin!(work);

        let period = self.heartbeat_period();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                records = &mut work => return Some(records),
                _ = ticker.tick() => {
                    if !self.persist_or_stop(self.shared.state()).await {
                        return None;
                    }
                }
            }
        }
    }

    fn heartbeat_period(&self) -> Duration {
        heartbeat_period(self.options.stale_after)
    }

    /// Records the paused state and waits for resume or cancel. Returns
    /// false when the run must stop.
    async fn park(&self) -> bool {
        let mut paused = self.shared.state();
        paused.status = SessionStatus::Paused;
        if !self.persist_or_stop(paused).await {
            return false;
        }
        log::info!("Analysis session paused at {}", self.shared.state().cursor);
        self.report();

        let heartbeat = self.heartbeat_period();
        while self.shared.pause.load(Ordering::SeqCst) && !self.shared.cancel.load(Ordering::SeqCst)
        {
            let woken = tokio::time::timeout(heartbeat, self.shared.wake.notified()).await;
            if woken.is_err() && !self.persist_or_stop(self.shared.state()).await {
                return false;
            }
        }

        if self.shared.cancel.load(Ordering::SeqCst) {
            return true;
        }

        let mut running = self.shared.state();
        running.status = SessionStatus::Running;
        if !self.persist_or_stop(running).await {
            return false;
        }
        log::info!("Analysis session resumed at {}", self.shared.state().cursor);
        self.report();
        true
    }

    async fn persist_or_stop(&self, state: SessionState) -> bool {
        match self.checkpoint(state).await {
            Ok(true) => true,
            Ok(false) => {
                self.abandon();
                false
            }
            Err(e) => {
                let message = format!("Checkpoint failed: {}", e);
                self.finish(SessionStatus::Failed, Some(message)).await;
                false
            }
        }
    }

    /// Writes `next` over the slot this run owns. Returns false when another
    /// owner has replaced it.
    async fn checkpoint(&self, mut next: SessionState) -> Result<bool, StoreError> {
        let expected = next.revision;
        next.revision = expected + 1;
        next.heartbeat_at = Some(Utc::now());

        let state = next.clone();
        let swapped = self
            .retrying("checkpoint", move |store| {
                store.compare_and_swap_session(Some(expected), &state)
            })
            .await?;
        if swapped {
            self.shared.commit(next);
        }
        Ok(swapped)
    }

    async fn finish(&self, status: SessionStatus, error: Option<String>) {
        let mut last = self.shared.state();
        last.status = status;
        last.ended_at = Some(Utc::now());
        last.last_error = error;

        match self.checkpoint(last.clone()).await {
            Ok(true) => {}
            Ok(false) => {
                log::warn!("Session slot changed hands before recording {}", status);
                self.shared.commit(last);
            }
            Err(e) => {
                log::error!("Could not record {} session state: {}", status, e);
                self.shared.commit(last);
            }
        }

        let state = self.shared.state();
        match &state.last_error {
            Some(error) => log::error!("Analysis session {} at {}: {}", status, state.cursor, error),
            None => log::info!(
                "Analysis session {} after {} assets",
                status,
                state.counts.processed
            ),
        }
        self.report();
    }

    fn abandon(&self) {
        log::error!("Session slot was taken over by another process, stopping");
        let mut state = self.shared.state();
        state.status = SessionStatus::Failed;
        state.ended_at = Some(Utc::now());
        state.last_error = Some("Session was taken over by another process".to_string());
        self.shared.commit(state);
        self.report();
    }

    async fn retrying<T, F>(&self, what: &str, op: F) -> Result<T, StoreError>
    where
        F: Fn(&dyn ResultsStore) -> Result<T, StoreError> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let op = Arc::new(op);
        let mut attempt = 0;
        loop {
            let call = Arc::clone(&op);
            match run_blocking(&self.store, move |store| call(store)).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.options.store_retries => {
                    attempt += 1;
                    let backoff = backoff_delay(self.options.retry_backoff, attempt);
                    log::warn!(
                        "Store {} failed (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        attempt,
                        self.options.store_retries + 1,
                        backoff,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn report(&self) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(self.shared.snapshot());
        }
    }
}
