//! The archive seam the orchestrator drives.
//!
//! [`Archive`] is the narrow surface the sync loop needs: the tip, the
//! multi-height transactional commit, and the three snapshot reads behind
//! cached result calculation. [`quorum_store::PollArchive`] is the
//! production implementation; tests drive the orchestrator against an
//! in-memory one.

use chrono::{DateTime, Utc};

use quorum_store::{PollArchive, PollUpdate, StoreError};
use quorum_types::{Bucket, Height, Registration};

/// What the orchestrator needs from the poll archive.
pub trait Archive: Send + Sync {
    /// The greatest committed height, or [`StoreError::NotFound`] while
    /// the archive is empty.
    fn tip_height(&self) -> impl Future<Output = Result<Height, StoreError>> + Send;

    /// Commit a batch of polls in one transaction, ascending by height.
    fn put_polls(
        &self,
        polls: Vec<PollUpdate>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// The registration set valid at `height`.
    fn registrations(
        &self,
        height: Height,
    ) -> impl Future<Output = Result<Vec<Registration>, StoreError>> + Send;

    /// All buckets valid at `height`, merged across universes.
    fn buckets(&self, height: Height)
    -> impl Future<Output = Result<Vec<Bucket>, StoreError>> + Send;

    /// The mint time stored for `height`.
    fn mint_time(
        &self,
        height: Height,
    ) -> impl Future<Output = Result<DateTime<Utc>, StoreError>> + Send;
}

impl Archive for PollArchive {
    async fn tip_height(&self) -> Result<Height, StoreError> {
        Self::tip_height(self).await
    }

    async fn put_polls(&self, polls: Vec<PollUpdate>) -> Result<(), StoreError> {
        Self::put_polls(self, polls).await
    }

    async fn registrations(&self, height: Height) -> Result<Vec<Registration>, StoreError> {
        Self::registrations(self, height).await
    }

    async fn buckets(&self, height: Height) -> Result<Vec<Bucket>, StoreError> {
        Self::buckets(self, height).await
    }

    async fn mint_time(&self, height: Height) -> Result<DateTime<Utc>, StoreError> {
        Self::mint_time(self, height).await
    }
}
