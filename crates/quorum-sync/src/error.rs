//! Error types for the sync layer.
//!
//! The taxonomy mirrors the failure semantics: a [`FetchError`] is
//! transient and per-height (retried, then dropped for the current pass
//! only), while a [`SyncError`] from the archive aborts the whole batch
//! and propagates.

use quorum_ranking::RankingError;
use quorum_store::StoreError;
use quorum_types::ValidationError;

/// A single-height external fetch failure. Transient: the orchestrator
/// retries up to its configured limit, then skips the height for the
/// current pass and targets it again on the next one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The external source could not be reached or timed out.
    #[error("external source unavailable: {0}")]
    Unavailable(String),

    /// The external source answered with something undecodable.
    #[error("malformed response from external source: {0}")]
    Malformed(String),
}

/// Errors surfaced by the orchestrator's public operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// An archive read or commit failed. Commits are atomic: the whole
    /// multi-height transaction rolled back.
    #[error("archive error: {0}")]
    Archive(#[from] StoreError),

    /// Result calculation over a stored snapshot failed.
    #[error("ranking error: {0}")]
    Ranking(#[from] RankingError),

    /// Malformed caller input (e.g. an off-grid height), rejected before
    /// touching cache or archive.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}
