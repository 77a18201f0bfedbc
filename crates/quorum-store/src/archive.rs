//! The poll archive: composed stores behind one transactional surface.
//!
//! A [`PollArchive`] owns one registration store, one or more bucket stores
//! (distinct universes, e.g. contract-sourced versus natively staked), and
//! the mint-time index, all over a single `PostgreSQL` pool. Every write
//! entry point wraps its full multi-table mutation in one transaction, so a
//! poll -- or a whole batch of polls -- becomes visible all at once or not
//! at all.
//!
//! Mutation is serialized per archive instance by one writer lock; reads
//! share it. One archive has one writer: there is no multi-writer
//! coordination.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;

use quorum_types::{
    Bucket, Height, HeightGrid, RecordBatch, Registration, ValidationError,
};

use crate::codec::{BucketCodec, RegistrationCodec};
use crate::delta_store::DeltaRecordStore;
use crate::error::StoreError;
use crate::legacy::{LegacyPoll, LegacyPollSource};
use crate::time_index::TimeIndex;

/// Emit a migration progress log once per this many heights.
const MIGRATION_LOG_EVERY: u64 = 1_000;

/// One height's full update, as passed to [`PollArchive::put_polls`].
#[derive(Debug, Clone)]
pub struct PollUpdate {
    /// The checkpoint height.
    pub height: Height,
    /// Mint time of the checkpoint.
    pub mint_time: DateTime<Utc>,
    /// Registration update at this height.
    pub registrations: RecordBatch<Registration>,
    /// Bucket updates, one per configured universe, in configuration order.
    pub buckets: Vec<RecordBatch<Bucket>>,
}

/// The composed, transactional poll archive.
pub struct PollArchive {
    pool: PgPool,
    grid: HeightGrid,
    registrations: DeltaRecordStore<RegistrationCodec>,
    buckets: Vec<DeltaRecordStore<BucketCodec>>,
    time_index: TimeIndex,
    /// Serializes mutation against this instance; reads share it.
    lock: RwLock<()>,
}

impl PollArchive {
    /// Create an archive over a pool with the given bucket universes.
    ///
    /// `bucket_kinds` become table-name prefixes and must be distinct
    /// lowercase SQL identifiers.
    pub fn new(pool: PgPool, grid: HeightGrid, bucket_kinds: &[&str]) -> Self {
        Self {
            pool,
            grid,
            registrations: DeltaRecordStore::new(RegistrationCodec::default()),
            buckets: bucket_kinds
                .iter()
                .map(|kind| DeltaRecordStore::new(BucketCodec::new(kind)))
                .collect(),
            time_index: TimeIndex::new(),
            lock: RwLock::new(()),
        }
    }

    /// The checkpoint grid this archive accepts heights on.
    pub const fn grid(&self) -> HeightGrid {
        self.grid
    }

    /// Idempotently create every table the archive uses.
    pub async fn init(&self) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        let mut tx = self.pool.begin().await?;
        self.registrations.create_tables(&mut tx).await?;
        for store in &self.buckets {
            store.create_tables(&mut tx).await?;
        }
        self.time_index.create_table(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    /// Write one poll: registrations, buckets, and mint time, atomically.
    pub async fn put_poll(
        &self,
        height: Height,
        mint_time: DateTime<Utc>,
        registrations: RecordBatch<Registration>,
        buckets: Vec<RecordBatch<Bucket>>,
    ) -> Result<(), StoreError> {
        self.put_polls(vec![PollUpdate {
            height,
            mint_time,
            registrations,
            buckets,
        }])
        .await
    }

    /// Write many polls in one transaction, applied in ascending height
    /// order regardless of input order.
    ///
    /// Nothing persists unless every poll in the batch commits: a failure
    /// anywhere rolls the whole transaction back.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] -- before any write -- for
    /// off-grid or duplicate heights, a universe-count mismatch, or a
    /// malformed record.
    pub async fn put_polls(&self, mut polls: Vec<PollUpdate>) -> Result<(), StoreError> {
        if polls.is_empty() {
            return Ok(());
        }
        self.validate_batch(&polls)?;
        polls.sort_by_key(|poll| poll.height);

        let _guard = self.lock.write().await;
        let mut tx = self.pool.begin().await?;
        for poll in &polls {
            self.registrations
                .put(&mut tx, poll.height, &poll.registrations)
                .await?;
            for (store, batch) in self.buckets.iter().zip(&poll.buckets) {
                store.put(&mut tx, poll.height, batch).await?;
            }
            self.time_index
                .put(&mut tx, poll.height, poll.mint_time)
                .await?;
        }
        tx.commit().await?;

        tracing::info!(
            polls = polls.len(),
            first = polls.first().map(|p| p.height),
            last = polls.last().map(|p| p.height),
            "Committed poll batch"
        );
        Ok(())
    }

    /// Reject a malformed batch before anything touches the database.
    fn validate_batch(&self, polls: &[PollUpdate]) -> Result<(), StoreError> {
        let mut seen = BTreeSet::new();
        for poll in polls {
            self.grid.check(poll.height)?;
            if !seen.insert(poll.height) {
                return Err(ValidationError::DuplicateHeight {
                    height: poll.height,
                }
                .into());
            }
            if poll.buckets.len() != self.buckets.len() {
                return Err(ValidationError::UniverseCountMismatch {
                    expected: self.buckets.len(),
                    actual: poll.buckets.len(),
                }
                .into());
            }
            if let Some(records) = poll.registrations.explicit_records() {
                for reg in records {
                    reg.validate()?;
                }
            }
            for batch in &poll.buckets {
                if let Some(records) = batch.explicit_records() {
                    for bucket in records {
                        bucket.validate()?;
                    }
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// The registration set valid at `height`.
    pub async fn registrations(&self, height: Height) -> Result<Vec<Registration>, StoreError> {
        let _guard = self.lock.read().await;
        let mut conn = self.pool.acquire().await?;
        self.registrations.get(&mut conn, height).await
    }

    /// All buckets valid at `height`, merged across universes in
    /// configuration order.
    pub async fn buckets(&self, height: Height) -> Result<Vec<Bucket>, StoreError> {
        let _guard = self.lock.read().await;
        let mut conn = self.pool.acquire().await?;
        let mut merged = Vec::new();
        for store in &self.buckets {
            merged.extend(store.get(&mut conn, height).await?);
        }
        Ok(merged)
    }

    /// Buckets valid at `height`, one list per universe.
    pub async fn buckets_by_universe(
        &self,
        height: Height,
    ) -> Result<Vec<(String, Vec<Bucket>)>, StoreError> {
        let _guard = self.lock.read().await;
        let mut conn = self.pool.acquire().await?;
        let mut out = Vec::with_capacity(self.buckets.len());
        for store in &self.buckets {
            let records = store.get(&mut conn, height).await?;
            out.push((store.kind().to_owned(), records));
        }
        Ok(out)
    }

    /// The mint time stored for `height`.
    pub async fn mint_time(&self, height: Height) -> Result<DateTime<Utc>, StoreError> {
        let _guard = self.lock.read().await;
        let mut conn = self.pool.acquire().await?;
        self.time_index.get(&mut conn, height).await
    }

    /// The greatest committed height, or [`StoreError::NotFound`] if the
    /// archive is empty.
    pub async fn tip_height(&self) -> Result<Height, StoreError> {
        let _guard = self.lock.read().await;
        let mut conn = self.pool.acquire().await?;
        self.time_index.tip_height(&mut conn).await
    }

    /// The greatest height whose mint time is at or before `ts`.
    pub async fn height_before(&self, ts: DateTime<Utc>) -> Result<Height, StoreError> {
        let _guard = self.lock.read().await;
        let mut conn = self.pool.acquire().await?;
        self.time_index.height_before(&mut conn, ts).await
    }

    // -----------------------------------------------------------------
    // Legacy migration
    // -----------------------------------------------------------------

    /// One-shot, resumable import from the legacy key-value poll log.
    ///
    /// Resumes from `tip_height + interval` (or the grid start on an empty
    /// archive) and walks the log until the first absent key, committing
    /// one poll per transaction so an interrupted run loses at most the
    /// in-flight height. Calling again after catch-up is a cheap no-op.
    ///
    /// Returns the number of heights migrated.
    pub async fn migrate<S: LegacyPollSource>(&self, source: &S) -> Result<u64, StoreError> {
        let mut next = match self.tip_height().await {
            Ok(tip) => self
                .grid
                .next(tip)
                .ok_or_else(|| StoreError::Integrity("height overflow during migration".into()))?,
            Err(StoreError::NotFound(_)) => self.grid.start(),
            Err(e) => return Err(e),
        };

        let mut migrated: u64 = 0;
        loop {
            let Some(bytes) = source.poll_bytes(next).await? else {
                break;
            };
            let poll = LegacyPoll::from_bytes(next, &bytes)?;
            self.put_poll(
                next,
                poll.mint_time,
                RecordBatch::from(poll.registrations),
                poll.buckets.into_iter().map(RecordBatch::from).collect(),
            )
            .await?;

            migrated = migrated.saturating_add(1);
            if migrated % MIGRATION_LOG_EVERY == 0 {
                tracing::info!(height = next, migrated, "Migration progress");
            }
            next = self
                .grid
                .next(next)
                .ok_or_else(|| StoreError::Integrity("height overflow during migration".into()))?;
        }

        if migrated > 0 {
            tracing::info!(migrated, resumed_to = next, "Legacy migration complete");
        }
        Ok(migrated)
    }
}
