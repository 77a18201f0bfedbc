//! Error types for the persistence layer.
//!
//! All errors are propagated via [`StoreError`], which wraps the underlying
//! [`sqlx`] and [`fred`] errors with context about which operation failed.
//! Two variants carry the archive's semantic distinctions: [`NotFound`]
//! (data not yet synced -- callers recover) and [`Integrity`] (the stored
//! data contradicts an invariant -- the enclosing transaction must roll
//! back and nothing may partially persist).
//!
//! [`NotFound`]: StoreError::NotFound
//! [`Integrity`]: StoreError::Integrity

use quorum_types::ValidationError;

/// Errors that can occur in the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// The legacy key-value source failed.
    #[error("legacy source error: {0}")]
    Legacy(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested height or record is not stored. Callers treat this as
    /// "not yet synced", never as corruption.
    #[error("not found: {0}")]
    NotFound(String),

    /// The stored data contradicts a structural invariant (dedup row-count
    /// mismatch, malformed stored record). Fatal: the caller's transaction
    /// must roll back.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Malformed caller input, rejected before any write.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether this error is the recoverable "not yet synced" case.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
