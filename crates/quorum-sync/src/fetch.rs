//! Per-height snapshot fetching.
//!
//! One worker fetches one height sequentially: mint time first, then the
//! registration pages, then each bucket universe's pages, continuing until
//! a short page signals end-of-data. The activity probe lets a quiet
//! height skip the record fetches entirely and commit no-change links.

use quorum_store::PollUpdate;
use quorum_types::{Bucket, Height, HeightGrid, RecordBatch, Registration};

use crate::error::FetchError;
use crate::reader::ChainReader;

/// Pagination and retry knobs a worker needs, copied out of `SyncConfig`
/// so spawned tasks don't borrow the orchestrator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FetchPlan {
    pub grid: HeightGrid,
    pub universes: usize,
    pub page_size: u16,
    pub retry_limit: u32,
}

/// Fetch one height's full snapshot.
pub(crate) async fn fetch_height<C: ChainReader>(
    reader: &C,
    plan: FetchPlan,
    height: Height,
) -> Result<PollUpdate, FetchError> {
    let mint_time = reader.block_time(height).await?;

    // Quiet since the previous grid height: nothing to fetch, commit links.
    if let Some(prev) = plan.grid.prev(height) {
        let from = prev.saturating_add(1);
        if !reader.has_activity_in_range(from, height).await? {
            return Ok(PollUpdate {
                height,
                mint_time,
                registrations: RecordBatch::NoChange,
                buckets: vec![RecordBatch::NoChange; plan.universes],
            });
        }
    }

    let registrations = fetch_registration_pages(reader, plan, height).await?;
    let mut buckets = Vec::with_capacity(plan.universes);
    for universe in 0..plan.universes {
        buckets.push(RecordBatch::from(
            fetch_bucket_pages(reader, plan, universe, height).await?,
        ));
    }

    Ok(PollUpdate {
        height,
        mint_time,
        registrations: RecordBatch::from(registrations),
        buckets,
    })
}

/// Fetch one height with per-height retries.
///
/// A failure here never aborts sibling heights in the same batch; the
/// caller records it and the height stays targeted on the next pass.
pub(crate) async fn fetch_with_retry<C: ChainReader>(
    reader: &C,
    plan: FetchPlan,
    height: Height,
) -> Result<PollUpdate, FetchError> {
    let mut last = FetchError::Unavailable("no fetch attempted".to_owned());
    for attempt in 1..=plan.retry_limit.max(1) {
        match fetch_height(reader, plan, height).await {
            Ok(poll) => return Ok(poll),
            Err(e) => {
                tracing::warn!(height, attempt, error = %e, "Height fetch failed");
                last = e;
            }
        }
    }
    Err(last)
}

async fn fetch_registration_pages<C: ChainReader>(
    reader: &C,
    plan: FetchPlan,
    height: Height,
) -> Result<Vec<Registration>, FetchError> {
    let mut out = Vec::new();
    let mut cursor = 0u64;
    loop {
        let (next, page) = reader
            .fetch_registrations(height, cursor, plan.page_size)
            .await?;
        let short = page.len() < usize::from(plan.page_size);
        out.extend(page);
        if short {
            return Ok(out);
        }
        cursor = next;
    }
}

async fn fetch_bucket_pages<C: ChainReader>(
    reader: &C,
    plan: FetchPlan,
    universe: usize,
    height: Height,
) -> Result<Vec<Bucket>, FetchError> {
    let mut out = Vec::new();
    let mut cursor = 0u64;
    loop {
        let (next, page) = reader
            .fetch_buckets(universe, height, cursor, plan.page_size)
            .await?;
        let short = page.len() < usize::from(plan.page_size);
        out.extend(page);
        if short {
            return Ok(out);
        }
        cursor = next;
    }
}
