//! The external checkpoint source, specified at its boundary.
//!
//! The chain reader is a black box to this crate: RPC transport, contract
//! decoding, and retry-free pagination live behind [`ChainReader`]. The
//! orchestrator only assumes that fetches are paginated (a short page
//! signals end-of-data) and that new-height notifications arrive on the
//! channel handed to [`subscribe_new_height`].
//!
//! [`subscribe_new_height`]: ChainReader::subscribe_new_height

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

use quorum_types::{Bucket, Height, Registration};

use crate::error::FetchError;

/// A read-only view of the external append-only checkpoint chain.
pub trait ChainReader: Send + Sync {
    /// The newest checkpoint height the source knows of.
    fn tip(&self) -> impl Future<Output = Result<Height, FetchError>> + Send;

    /// The mint time of the checkpoint at `height`.
    fn block_time(
        &self,
        height: Height,
    ) -> impl Future<Output = Result<DateTime<Utc>, FetchError>> + Send;

    /// One page of the registration set at `height`.
    ///
    /// Returns the next cursor and the page; a page shorter than
    /// `page_size` is the last one.
    fn fetch_registrations(
        &self,
        height: Height,
        cursor: u64,
        page_size: u16,
    ) -> impl Future<Output = Result<(u64, Vec<Registration>), FetchError>> + Send;

    /// One page of the bucket set for one universe at `height`.
    ///
    /// `universe` indexes the archive's configured bucket universes in
    /// order. Same short-page termination as registrations.
    fn fetch_buckets(
        &self,
        universe: usize,
        height: Height,
        cursor: u64,
        page_size: u16,
    ) -> impl Future<Output = Result<(u64, Vec<Bucket>), FetchError>> + Send;

    /// Whether any registration or staking activity happened in the
    /// inclusive height range. A quiet range lets the orchestrator commit
    /// no-change links without fetching anything.
    fn has_activity_in_range(
        &self,
        from: Height,
        to: Height,
    ) -> impl Future<Output = Result<bool, FetchError>> + Send;

    /// Push every newly-minted checkpoint height into `notify` until the
    /// shared `shutdown` signal flips true or the notify channel closes.
    fn subscribe_new_height(
        &self,
        notify: mpsc::Sender<Height>,
        shutdown: watch::Receiver<bool>,
    ) -> impl Future<Output = Result<(), FetchError>> + Send;
}
