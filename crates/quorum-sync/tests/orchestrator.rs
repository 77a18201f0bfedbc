//! Orchestrator behavior against in-memory chain and archive doubles.
//!
//! Everything here runs without Postgres: the [`Archive`] seam is backed by
//! a `BTreeMap` that resolves no-change batches against the previous
//! height, and the [`ChainReader`] double serves canned pages, injects
//! per-height failures, and records fetch concurrency.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch, Mutex};

use quorum_store::{PollUpdate, StoreError};
use quorum_sync::{
    Archive, ChainReader, FetchError, ScoreOverrides, SyncConfig, SyncError, SyncOrchestrator,
    SyncStatus,
};
use quorum_types::{Bucket, Height, HeightGrid, RecordBatch, Registration};

const UNIVERSES: usize = 2;

fn grid() -> HeightGrid {
    HeightGrid::new(24, 24).unwrap()
}

fn mint_time(height: Height) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + i64::try_from(height).unwrap(), 0)
        .unwrap()
}

fn registration(name: &str) -> Registration {
    Registration {
        name: name.to_owned(),
        address: format!("addr-{name}"),
        operator_address: format!("op-{name}"),
        reward_address: format!("rw-{name}"),
        self_stake_weight: 1,
    }
}

fn bucket(voter: &str, candidate: &str, amount: i64) -> Bucket {
    Bucket {
        start_time: Utc.timestamp_opt(1_600_000_000, 0).unwrap(),
        duration_secs: 86_400,
        amount: Decimal::new(amount, 0),
        decay: false,
        voter: voter.to_owned(),
        candidate: candidate.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Archive double
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredPoll {
    mint_time: DateTime<Utc>,
    registrations: Vec<Registration>,
    buckets: Vec<Vec<Bucket>>,
}

#[derive(Debug, Default)]
struct ArchiveInner {
    polls: BTreeMap<Height, StoredPoll>,
    fail_next_commit: bool,
}

/// In-memory [`Archive`]: resolves no-change batches against the previous
/// committed height, exactly like the delta store's identical links.
#[derive(Debug, Default)]
struct MemoryArchive {
    inner: Mutex<ArchiveInner>,
    snapshot_reads: AtomicUsize,
}

impl MemoryArchive {
    async fn committed_heights(&self) -> Vec<Height> {
        self.inner.lock().await.polls.keys().copied().collect()
    }

    async fn fail_next_commit(&self) {
        self.inner.lock().await.fail_next_commit = true;
    }

    fn reads(&self) -> usize {
        self.snapshot_reads.load(Ordering::SeqCst)
    }

    async fn stored(&self, height: Height) -> StoredPoll {
        self.inner.lock().await.polls.get(&height).cloned().unwrap()
    }
}

impl Archive for MemoryArchive {
    async fn tip_height(&self) -> Result<Height, StoreError> {
        self.inner
            .lock()
            .await
            .polls
            .keys()
            .next_back()
            .copied()
            .ok_or_else(|| StoreError::NotFound("archive is empty".to_owned()))
    }

    async fn put_polls(&self, mut polls: Vec<PollUpdate>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_next_commit {
            inner.fail_next_commit = false;
            return Err(StoreError::Integrity("injected commit failure".to_owned()));
        }
        polls.sort_by_key(|p| p.height);
        for poll in polls {
            if inner.polls.contains_key(&poll.height) {
                return Err(StoreError::Integrity(format!(
                    "height {} already committed",
                    poll.height
                )));
            }
            let previous = inner
                .polls
                .range(..poll.height)
                .next_back()
                .map(|(_, stored)| stored.clone());
            let registrations = match poll.registrations.explicit_records() {
                Some(records) => records.to_vec(),
                None => previous
                    .as_ref()
                    .map(|p| p.registrations.clone())
                    .unwrap_or_default(),
            };
            let buckets = poll
                .buckets
                .iter()
                .enumerate()
                .map(|(universe, batch)| match batch.explicit_records() {
                    Some(records) => records.to_vec(),
                    None => previous
                        .as_ref()
                        .and_then(|p| p.buckets.get(universe).cloned())
                        .unwrap_or_default(),
                })
                .collect();
            inner.polls.insert(
                poll.height,
                StoredPoll {
                    mint_time: poll.mint_time,
                    registrations,
                    buckets,
                },
            );
        }
        Ok(())
    }

    async fn registrations(&self, height: Height) -> Result<Vec<Registration>, StoreError> {
        self.snapshot_reads.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().await;
        inner
            .polls
            .get(&height)
            .map(|p| p.registrations.clone())
            .ok_or_else(|| StoreError::NotFound(format!("height {height}")))
    }

    async fn buckets(&self, height: Height) -> Result<Vec<Bucket>, StoreError> {
        self.snapshot_reads.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().await;
        inner
            .polls
            .get(&height)
            .map(|p| p.buckets.concat())
            .ok_or_else(|| StoreError::NotFound(format!("height {height}")))
    }

    async fn mint_time(&self, height: Height) -> Result<DateTime<Utc>, StoreError> {
        self.snapshot_reads.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().await;
        inner
            .polls
            .get(&height)
            .map(|p| p.mint_time)
            .ok_or_else(|| StoreError::NotFound(format!("height {height}")))
    }
}

// ---------------------------------------------------------------------------
// Chain reader double
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MockReader {
    tip: AtomicU64,
    tip_unavailable: AtomicBool,
    registrations: BTreeMap<Height, Vec<Registration>>,
    buckets: BTreeMap<Height, Vec<Vec<Bucket>>>,
    /// Heights with on-chain activity; quiet ranges short-circuit to
    /// no-change batches.
    active: BTreeSet<Height>,
    /// Remaining injected failures per height, consumed one per attempt.
    failures: StdMutex<BTreeMap<Height, u32>>,
    registration_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    notifications: StdMutex<Option<mpsc::Receiver<Height>>>,
}

impl MockReader {
    fn with_heights(heights: &[Height]) -> Self {
        let mut out = Self::default();
        out.tip = AtomicU64::new(heights.last().copied().unwrap_or_default());
        for &height in heights {
            out.registrations.insert(
                height,
                vec![registration("alpha"), registration("beta")],
            );
            out.buckets.insert(
                height,
                vec![
                    vec![bucket("voter-1", "alpha", 300)],
                    vec![bucket("voter-2", "beta", 200)],
                ],
            );
            out.active.insert(height);
        }
        out
    }

    fn fail_height(&self, height: Height, times: u32) {
        self.failures.lock().unwrap().insert(height, times);
    }

    fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take_failure(&self, height: Height) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&height) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn page<R: Clone>(records: Option<&Vec<R>>, cursor: u64, page_size: u16) -> (u64, Vec<R>) {
        let records = records.cloned().unwrap_or_default();
        let from = usize::try_from(cursor).unwrap().min(records.len());
        let to = from.saturating_add(usize::from(page_size)).min(records.len());
        (cursor + u64::try_from(to - from).unwrap(), records[from..to].to_vec())
    }
}

impl ChainReader for MockReader {
    async fn tip(&self) -> Result<Height, FetchError> {
        if self.tip_unavailable.load(Ordering::SeqCst) {
            return Err(FetchError::Unavailable("tip endpoint down".to_owned()));
        }
        Ok(self.tip.load(Ordering::SeqCst))
    }

    async fn block_time(&self, height: Height) -> Result<DateTime<Utc>, FetchError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.take_failure(height) {
            return Err(FetchError::Unavailable(format!("height {height} down")));
        }
        Ok(mint_time(height))
    }

    async fn fetch_registrations(
        &self,
        height: Height,
        cursor: u64,
        page_size: u16,
    ) -> Result<(u64, Vec<Registration>), FetchError> {
        self.registration_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::page(self.registrations.get(&height), cursor, page_size))
    }

    async fn fetch_buckets(
        &self,
        universe: usize,
        height: Height,
        cursor: u64,
        page_size: u16,
    ) -> Result<(u64, Vec<Bucket>), FetchError> {
        let per_universe = self.buckets.get(&height).and_then(|b| b.get(universe));
        Ok(Self::page(per_universe, cursor, page_size))
    }

    async fn has_activity_in_range(&self, from: Height, to: Height) -> Result<bool, FetchError> {
        Ok(self.active.range(from..=to).next().is_some())
    }

    async fn subscribe_new_height(
        &self,
        notify: mpsc::Sender<Height>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), FetchError> {
        let feed = self.notifications.lock().unwrap().take();
        let Some(mut feed) = feed else {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            return Ok(());
        };
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
                height = feed.recv() => match height {
                    Some(height) => {
                        if notify.send(height).await.is_err() {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    }
}

fn orchestrator(
    reader: Arc<MockReader>,
    archive: Arc<MemoryArchive>,
    config: SyncConfig,
) -> SyncOrchestrator<MockReader, MemoryArchive> {
    SyncOrchestrator::new(reader, archive, config)
}

// ---------------------------------------------------------------------------
// Catch-up
// ---------------------------------------------------------------------------

#[tokio::test]
async fn catches_up_to_tip_and_serves_ranked_results() {
    let reader = Arc::new(MockReader::with_heights(&[24, 48, 72, 96]));
    let archive = Arc::new(MemoryArchive::default());
    let sync = orchestrator(
        Arc::clone(&reader),
        Arc::clone(&archive),
        SyncConfig::new(grid(), UNIVERSES),
    );

    sync.sync_to_tip().await.unwrap();
    assert_eq!(archive.committed_heights().await, vec![24, 48, 72, 96]);
    assert_eq!(sync.status(), SyncStatus::Active);

    // A one-day non-decaying stake has weight 1, so scores equal amounts.
    let result = sync.result_by_height(96).await.unwrap();
    assert_eq!(result.mint_time, mint_time(96));
    assert_eq!(result.delegates.len(), 2);
    assert_eq!(result.delegates[0].name, "alpha");
    assert_eq!(result.delegates[0].score, Decimal::new(300, 0));
    assert_eq!(result.delegates[1].name, "beta");
    assert_eq!(result.delegates[1].score, Decimal::new(200, 0));
}

#[tokio::test]
async fn worker_pool_bounds_in_flight_fetches() {
    let heights: Vec<Height> = (1..=8).map(|i| i * 24).collect();
    let reader = Arc::new(MockReader::with_heights(&heights));
    let archive = Arc::new(MemoryArchive::default());
    let config = SyncConfig::new(grid(), UNIVERSES)
        .with_batch_size(8)
        .with_workers(2);
    let sync = orchestrator(Arc::clone(&reader), Arc::clone(&archive), config);

    sync.sync_to_tip().await.unwrap();
    assert_eq!(archive.committed_heights().await, heights);
    assert!(
        reader.max_concurrency() <= 2,
        "observed {} concurrent fetches with a pool of 2",
        reader.max_concurrency()
    );
}

#[tokio::test]
async fn failed_height_blocks_commits_past_it() {
    let reader = Arc::new(MockReader::with_heights(&[24, 48, 72, 96]));
    // Height 48 stays down through this pass's retries and the immediate
    // follow-up window.
    reader.fail_height(48, 10);
    let archive = Arc::new(MemoryArchive::default());
    let config = SyncConfig::new(grid(), UNIVERSES).with_retry_limit(2);
    let sync = orchestrator(Arc::clone(&reader), Arc::clone(&archive), config);

    sync.sync_to_tip().await.unwrap();
    // Heights 72 and 96 fetched fine but must not land ahead of 48.
    assert_eq!(archive.committed_heights().await, vec![24]);

    // The source recovers; the next pass picks up exactly where the
    // archive tip left off.
    reader.fail_height(48, 0);
    sync.sync_to_tip().await.unwrap();
    assert_eq!(archive.committed_heights().await, vec![24, 48, 72, 96]);
}

#[tokio::test]
async fn transient_failure_consumed_by_retries_is_invisible() {
    let reader = Arc::new(MockReader::with_heights(&[24, 48, 72]));
    reader.fail_height(48, 2);
    let archive = Arc::new(MemoryArchive::default());
    let config = SyncConfig::new(grid(), UNIVERSES).with_retry_limit(3);
    let sync = orchestrator(Arc::clone(&reader), Arc::clone(&archive), config);

    sync.sync_to_tip().await.unwrap();
    assert_eq!(archive.committed_heights().await, vec![24, 48, 72]);
}

#[tokio::test]
async fn unreachable_tip_stalls_without_error() {
    let reader = Arc::new(MockReader::with_heights(&[24]));
    reader.tip_unavailable.store(true, Ordering::SeqCst);
    let archive = Arc::new(MemoryArchive::default());
    let sync = orchestrator(
        Arc::clone(&reader),
        Arc::clone(&archive),
        SyncConfig::new(grid(), UNIVERSES),
    );

    sync.sync_to_tip().await.unwrap();
    assert!(archive.committed_heights().await.is_empty());
    assert_eq!(sync.status(), SyncStatus::Starting);
}

#[tokio::test]
async fn commit_failure_propagates() {
    let reader = Arc::new(MockReader::with_heights(&[24]));
    let archive = Arc::new(MemoryArchive::default());
    archive.fail_next_commit().await;
    let sync = orchestrator(
        Arc::clone(&reader),
        Arc::clone(&archive),
        SyncConfig::new(grid(), UNIVERSES),
    );

    let err = sync.sync_to_tip().await.unwrap_err();
    assert!(matches!(err, SyncError::Archive(_)));
}

#[tokio::test]
async fn quiet_heights_commit_no_change_links() {
    let mut reader = MockReader::with_heights(&[24, 48, 72]);
    reader.active = BTreeSet::from([24]);
    let reader = Arc::new(reader);
    let archive = Arc::new(MemoryArchive::default());
    let sync = orchestrator(
        Arc::clone(&reader),
        Arc::clone(&archive),
        SyncConfig::new(grid(), UNIVERSES),
    );

    sync.sync_to_tip().await.unwrap();
    assert_eq!(archive.committed_heights().await, vec![24, 48, 72]);

    // Quiet heights resolve to the previous snapshot without any record
    // fetches: only height 24 ever asked for registration pages.
    let at_24 = archive.stored(24).await;
    let at_72 = archive.stored(72).await;
    assert_eq!(at_24.registrations, at_72.registrations);
    assert_eq!(at_24.buckets, at_72.buckets);
    assert_eq!(reader.registration_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn short_page_ends_pagination() {
    let reader = Arc::new(MockReader::with_heights(&[24]));
    let archive = Arc::new(MemoryArchive::default());
    let mut config = SyncConfig::new(grid(), UNIVERSES);
    config.page_size = 1;
    let sync = orchestrator(Arc::clone(&reader), Arc::clone(&archive), config);

    sync.sync_to_tip().await.unwrap();
    let stored = archive.stored(24).await;
    assert_eq!(stored.registrations.len(), 2);
    // Two full single-record pages plus the empty terminating page.
    assert_eq!(reader.registration_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn ceiling_halts_sync_permanently() {
    let heights: Vec<Height> = (1..=8).map(|i| i * 24).collect();
    let reader = Arc::new(MockReader::with_heights(&heights));
    let archive = Arc::new(MemoryArchive::default());
    let config = SyncConfig::new(grid(), UNIVERSES)
        .with_batch_size(8)
        .with_ceiling(96);
    let sync = orchestrator(Arc::clone(&reader), Arc::clone(&archive), config);

    sync.sync_to_tip().await.unwrap();
    assert_eq!(archive.committed_heights().await, vec![24, 48, 72]);

    // The halt is permanent: further passes make no progress.
    sync.sync_to_tip().await.unwrap();
    assert_eq!(archive.committed_heights().await, vec![24, 48, 72]);
}

// ---------------------------------------------------------------------------
// Result reads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn off_grid_result_is_rejected_before_any_io() {
    let reader = Arc::new(MockReader::with_heights(&[24]));
    let archive = Arc::new(MemoryArchive::default());
    let sync = orchestrator(
        Arc::clone(&reader),
        Arc::clone(&archive),
        SyncConfig::new(grid(), UNIVERSES),
    );
    sync.sync_to_tip().await.unwrap();
    let baseline = archive.reads();

    let err = sync.result_by_height(25).await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert_eq!(archive.reads(), baseline);
}

#[tokio::test]
async fn unsynced_height_is_not_found() {
    let reader = Arc::new(MockReader::with_heights(&[24]));
    let archive = Arc::new(MemoryArchive::default());
    let sync = orchestrator(
        Arc::clone(&reader),
        Arc::clone(&archive),
        SyncConfig::new(grid(), UNIVERSES),
    );
    sync.sync_to_tip().await.unwrap();

    let err = sync.result_by_height(480).await.unwrap_err();
    assert!(matches!(err, SyncError::Archive(e) if e.is_not_found()));
}

#[tokio::test]
async fn results_are_cached() {
    let reader = Arc::new(MockReader::with_heights(&[24, 48]));
    let archive = Arc::new(MemoryArchive::default());
    let sync = orchestrator(
        Arc::clone(&reader),
        Arc::clone(&archive),
        SyncConfig::new(grid(), UNIVERSES),
    );
    sync.sync_to_tip().await.unwrap();

    let first = sync.result_by_height(48).await.unwrap();
    let after_miss = archive.reads();
    let second = sync.result_by_height(48).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(archive.reads(), after_miss);
}

#[tokio::test]
async fn corrections_apply_and_rerank() {
    let reader = Arc::new(MockReader::with_heights(&[24, 48]));
    let archive = Arc::new(MemoryArchive::default());
    let sync = orchestrator(
        Arc::clone(&reader),
        Arc::clone(&archive),
        SyncConfig::new(grid(), UNIVERSES),
    )
    .with_corrector(ScoreOverrides::new().with_override(48, "beta", Decimal::new(900, 0)));
    sync.sync_to_tip().await.unwrap();

    // Height 24 is untouched by the table.
    let untouched = sync.result_by_height(24).await.unwrap();
    assert_eq!(untouched.delegates[0].name, "alpha");

    // At height 48 the override lifts beta above alpha.
    let corrected = sync.result_by_height(48).await.unwrap();
    assert_eq!(corrected.delegates[0].name, "beta");
    assert_eq!(corrected.delegates[0].score, Decimal::new(900, 0));
}

// ---------------------------------------------------------------------------
// Status and the notification loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_reflects_staleness() {
    let reader = Arc::new(MockReader::with_heights(&[24]));
    let archive = Arc::new(MemoryArchive::default());
    let config = SyncConfig::new(grid(), UNIVERSES).with_staleness(Duration::ZERO);
    let sync = orchestrator(Arc::clone(&reader), Arc::clone(&archive), config);

    assert_eq!(sync.status(), SyncStatus::Starting);
    sync.sync_to_tip().await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(sync.status(), SyncStatus::Inactive);
}

#[tokio::test]
async fn run_follows_notifications_and_stops() {
    let reader = MockReader::with_heights(&[24, 48]);
    reader.tip.store(24, Ordering::SeqCst);
    let (feed_tx, feed_rx) = mpsc::channel(4);
    *reader.notifications.lock().unwrap() = Some(feed_rx);
    let reader = Arc::new(reader);
    let archive = Arc::new(MemoryArchive::default());
    let sync = Arc::new(orchestrator(
        Arc::clone(&reader),
        Arc::clone(&archive),
        SyncConfig::new(grid(), UNIVERSES),
    ));

    let running = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.run().await })
    };

    // The initial catch-up lands height 24.
    wait_for_tip(&archive, 24).await;

    // A new checkpoint arrives: tip advances and the loop follows.
    reader.tip.store(48, Ordering::SeqCst);
    feed_tx.send(48).await.unwrap();
    wait_for_tip(&archive, 48).await;

    sync.stop();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("run did not stop")
        .unwrap()
        .unwrap();
}

async fn wait_for_tip(archive: &MemoryArchive, expected: Height) {
    for _ in 0..500 {
        if archive.committed_heights().await.last() == Some(&expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("archive never reached height {expected}");
}
