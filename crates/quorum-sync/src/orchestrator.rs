//! The sync orchestrator: bounded-parallel catch-up and cached reads.
//!
//! One orchestrator instance owns one archive. It drives the archive
//! toward the external tip in bounded windows: a fixed-size worker pool
//! fetches heights in parallel, each worker retries its single height up
//! to the configured limit, and whatever settled successfully is
//! committed -- ascending -- in one multi-height transaction. Failed
//! heights are simply omitted; the next pass targets them again because
//! the archive tip never moved past them.
//!
//! An unreachable or malformed external source never crashes the loop; it
//! only stalls progress, observable as [`SyncStatus::Inactive`]. Archive
//! commit failures do propagate: they mean the batch rolled back and
//! continuing would rebuild the same batch forever.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lru::LruCache;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;

use quorum_ranking::{CalculatorConfig, ResultCalculator};
use quorum_store::PollUpdate;
use quorum_types::{ElectionResult, Height, HeightGrid};

use crate::archive::Archive;
use crate::correction::{NoCorrections, ResultCorrector};
use crate::error::{FetchError, SyncError};
use crate::fetch::{fetch_with_retry, FetchPlan};
use crate::reader::ChainReader;
use crate::status::{derive, SyncStatus};

/// Buffered new-height notifications before the source sees backpressure.
const NOTIFY_BUFFER: usize = 16;

/// Default number of heights fetched per catch-up window.
const DEFAULT_BATCH_SIZE: u64 = 8;

/// Default worker-pool size.
const DEFAULT_WORKERS: usize = 4;

/// Default per-height retry limit.
const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Default fetch page size.
const DEFAULT_PAGE_SIZE: u16 = 256;

/// Default staleness window before `Active` degrades to `Inactive`.
const DEFAULT_STALENESS_SECS: u64 = 300;

/// Default result-cache capacity.
const DEFAULT_CACHE_SIZE: usize = 10;

/// Builds the calculator policy for one snapshot's mint time.
type CalculatorFactory = Box<dyn Fn(DateTime<Utc>) -> CalculatorConfig + Send + Sync>;

/// Tuning knobs for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// The checkpoint grid (start height + interval).
    pub grid: HeightGrid,
    /// Number of bucket universes the archive is configured with.
    pub universes: usize,
    /// Maximum heights per catch-up window.
    pub batch_size: u64,
    /// Fixed worker-pool size bounding in-flight fetches.
    pub workers: usize,
    /// Per-height fetch attempts before the height is skipped for the
    /// current pass.
    pub retry_limit: u32,
    /// Records per fetch page; a short page ends pagination.
    pub page_size: u16,
    /// How long after the last successful commit the orchestrator still
    /// reports [`SyncStatus::Active`].
    pub staleness: Duration,
    /// Bounded capacity of the per-height result cache.
    pub result_cache_size: NonZeroUsize,
    /// Optional ceiling: syncing halts permanently once the archive
    /// reaches `ceiling - interval`.
    pub ceiling: Option<Height>,
}

impl SyncConfig {
    /// Defaults for the given grid and universe count.
    pub fn new(grid: HeightGrid, universes: usize) -> Self {
        Self {
            grid,
            universes,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            retry_limit: DEFAULT_RETRY_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
            staleness: Duration::from_secs(DEFAULT_STALENESS_SECS),
            result_cache_size: NonZeroUsize::new(DEFAULT_CACHE_SIZE)
                .unwrap_or(NonZeroUsize::MIN),
            ceiling: None,
        }
    }

    /// Set the catch-up window size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the worker-pool size.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the per-height retry limit.
    #[must_use]
    pub const fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Set the staleness window.
    #[must_use]
    pub const fn with_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }

    /// Set the permanent ceiling height.
    #[must_use]
    pub const fn with_ceiling(mut self, ceiling: Height) -> Self {
        self.ceiling = Some(ceiling);
        self
    }
}

/// Keeps the archive caught up to an external checkpoint source and
/// serves cached, corrected election results.
pub struct SyncOrchestrator<C: ChainReader, A: Archive> {
    reader: Arc<C>,
    archive: Arc<A>,
    config: SyncConfig,
    corrector: Box<dyn ResultCorrector>,
    calculator: CalculatorFactory,
    cache: Mutex<LruCache<Height, Arc<ElectionResult>>>,
    last_success: Mutex<Option<Instant>>,
    shutdown: watch::Sender<bool>,
}

impl<C: ChainReader, A: Archive> SyncOrchestrator<C, A> {
    /// Create an orchestrator with the default calculator policy and no
    /// corrections.
    pub fn new(reader: Arc<C>, archive: Arc<A>, config: SyncConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            reader,
            archive,
            cache: Mutex::new(LruCache::new(config.result_cache_size)),
            config,
            corrector: Box::new(NoCorrections),
            calculator: Box::new(CalculatorConfig::new),
            last_success: Mutex::new(None),
            shutdown,
        }
    }

    /// Install a correction table for known historical results.
    #[must_use]
    pub fn with_corrector(mut self, corrector: impl ResultCorrector + 'static) -> Self {
        self.corrector = Box::new(corrector);
        self
    }

    /// Replace the calculator policy factory (thresholds, score function).
    #[must_use]
    pub fn with_calculator(
        mut self,
        factory: impl Fn(DateTime<Utc>) -> CalculatorConfig + Send + Sync + 'static,
    ) -> Self {
        self.calculator = Box::new(factory);
        self
    }

    /// Current derived status.
    pub fn status(&self) -> SyncStatus {
        let last = *self
            .last_success
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        derive(last, self.config.staleness)
    }

    /// Signal the sync loop (and the subscription sharing the signal) to
    /// stop.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl<C: ChainReader + 'static, A: Archive> SyncOrchestrator<C, A> {
    /// Run until stopped: catch up to the external tip, then follow
    /// new-checkpoint notifications, one bounded fetch+commit pass each.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Archive`] if a batch commit fails; the batch
    /// rolled back atomically. External-source failures never surface
    /// here -- they stall progress instead.
    pub async fn run(&self) -> Result<(), SyncError> {
        self.sync_to_tip().await?;

        let (notify_tx, mut notify_rx) = mpsc::channel::<Height>(NOTIFY_BUFFER);
        let mut shutdown_rx = self.shutdown.subscribe();
        let subscription = {
            let reader = Arc::clone(&self.reader);
            let shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                if let Err(e) = reader.subscribe_new_height(notify_tx, shutdown).await {
                    tracing::warn!(error = %e, "Checkpoint subscription ended with error");
                }
            })
        };

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                notified = notify_rx.recv() => {
                    match notified {
                        Some(tip) => {
                            tracing::debug!(tip, "New checkpoint notification");
                            self.sync_to_tip().await?;
                        }
                        // Subscription closed its side; nothing more will
                        // ever arrive.
                        None => break,
                    }
                }
            }
            if *shutdown_rx.borrow() {
                break;
            }
        }

        subscription.abort();
        tracing::info!("Sync loop stopped");
        Ok(())
    }

    /// One or more bounded fetch+commit passes until the archive is
    /// caught up with the external tip (or the source stalls).
    pub async fn sync_to_tip(&self) -> Result<(), SyncError> {
        loop {
            let Some(next) = self.next_height().await? else {
                // Ceiling reached: halt permanently.
                self.stop();
                return Ok(());
            };
            let tip = match self.reader.tip().await {
                Ok(tip) => tip,
                Err(e) => {
                    tracing::warn!(error = %e, "External tip unavailable; stalling");
                    return Ok(());
                }
            };
            if tip < next {
                return Ok(());
            }

            let end = self.window_end(next, tip);
            let heights = self.window_heights(next, end);
            let mut outcomes: BTreeMap<_, _> =
                self.fetch_window(&heights).await.into_iter().collect();

            // Only the contiguous run of successes starting at `next` may
            // commit: moving the archive tip past a failed height would
            // orphan it forever and resolve later no-change links against
            // the wrong predecessor. Successes past the first failure are
            // discarded and refetched.
            let mut polls = Vec::with_capacity(heights.len());
            let mut blocked = false;
            for &height in &heights {
                match outcomes.remove(&height) {
                    Some(Ok(poll)) if !blocked => polls.push(poll),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        blocked = true;
                        tracing::warn!(height, error = %e, "Height unfilled; re-targeted next pass");
                    }
                    None => blocked = true,
                }
            }
            if polls.is_empty() {
                // The very first height of the window failed; nothing to
                // commit, let the next pass start over rather than spin.
                return Ok(());
            }

            self.archive.put_polls(polls).await?;
            *self
                .last_success
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

            if !blocked && end >= tip {
                return Ok(());
            }
        }
    }

    /// The next height the archive needs, or `None` once the ceiling is
    /// reached.
    async fn next_height(&self) -> Result<Option<Height>, SyncError> {
        let next = match self.archive.tip_height().await {
            Ok(tip) => match self.config.grid.next(tip) {
                Some(next) => next,
                None => return Ok(None),
            },
            Err(e) if e.is_not_found() => self.config.grid.start(),
            Err(e) => return Err(e.into()),
        };
        if let Some(ceiling) = self.config.ceiling {
            let halt_at = ceiling.saturating_sub(self.config.grid.interval());
            if next > halt_at {
                tracing::info!(ceiling, halt_at, "Ceiling reached; halting sync");
                return Ok(None);
            }
        }
        Ok(Some(next))
    }

    /// Clamp one window to the batch size, the external tip, and the
    /// ceiling.
    fn window_end(&self, next: Height, tip: Height) -> Height {
        let span = self
            .config
            .batch_size
            .saturating_sub(1)
            .saturating_mul(self.config.grid.interval());
        let mut end = next.saturating_add(span).min(tip);
        if let Some(ceiling) = self.config.ceiling {
            end = end.min(ceiling.saturating_sub(self.config.grid.interval()));
        }
        end
    }

    fn window_heights(&self, next: Height, end: Height) -> Vec<Height> {
        let mut heights = Vec::new();
        let mut height = next;
        while height <= end {
            heights.push(height);
            match self.config.grid.next(height) {
                Some(h) => height = h,
                None => break,
            }
        }
        heights
    }

    /// Fetch a window of heights through the bounded worker pool.
    ///
    /// Exactly one outcome per height: a poll or that height's own
    /// recorded failure. One height's failure never aborts its siblings.
    async fn fetch_window(
        &self,
        heights: &[Height],
    ) -> Vec<(Height, Result<PollUpdate, FetchError>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let plan = FetchPlan {
            grid: self.config.grid,
            universes: self.config.universes,
            page_size: self.config.page_size,
            retry_limit: self.config.retry_limit,
        };

        let mut join_set = JoinSet::new();
        for &height in heights {
            let reader = Arc::clone(&self.reader);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                match semaphore.acquire_owned().await {
                    Ok(_permit) => (height, fetch_with_retry(reader.as_ref(), plan, height).await),
                    Err(_) => (
                        height,
                        Err(FetchError::Unavailable("worker pool closed".to_owned())),
                    ),
                }
            });
        }

        let mut outcomes = Vec::with_capacity(heights.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(error = %e, "Fetch worker failed to join"),
            }
        }
        outcomes
    }

    /// The ranked, corrected election result at `height`.
    ///
    /// Validates the height against the grid before touching the cache or
    /// the archive; serves cache hits without any I/O; on a miss, reads
    /// the stored snapshot, runs the calculator, applies the correction
    /// table, and caches the result.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Validation`] for off-grid heights and
    /// [`SyncError::Archive`] (not-found) for heights not yet synced.
    pub async fn result_by_height(&self, height: Height) -> Result<Arc<ElectionResult>, SyncError> {
        self.config.grid.check(height)?;

        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&height)
        {
            return Ok(Arc::clone(hit));
        }

        let mint_time = self.archive.mint_time(height).await?;
        let registrations = self.archive.registrations(height).await?;
        let buckets = self.archive.buckets(height).await?;

        let mut calc = ResultCalculator::new((self.calculator)(mint_time));
        calc.add_registrations(&registrations)?;
        calc.add_buckets(&buckets)?;
        let mut result = calc.calculate();
        self.corrector.correct(height, &mut result);

        let result = Arc::new(result);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(height, Arc::clone(&result));
        Ok(result)
    }
}
