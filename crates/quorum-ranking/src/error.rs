//! Error types for result calculation.

use quorum_types::ValidationError;

/// Errors that can occur while building an election result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RankingError {
    /// Two registrations carried the same candidate name. Fatal: the
    /// snapshot is corrupt, no result can be produced from it.
    #[error("duplicate candidate name `{name}`")]
    DuplicateCandidate {
        /// The repeated name.
        name: String,
    },

    /// Registrations were added after buckets. Votes must resolve against
    /// a complete candidate set, so the ordering is enforced strictly.
    #[error("registrations must be added before any bucket")]
    RegistrationsAfterBuckets,

    /// A score or total overflowed [`rust_decimal::Decimal`] range.
    #[error("accumulator overflow while scoring candidate `{candidate}`")]
    Overflow {
        /// The candidate whose accumulation overflowed.
        candidate: String,
    },

    /// Malformed input, rejected before any mutation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
