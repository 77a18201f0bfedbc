//! Validation errors shared by the archive and the calculator.

use rust_decimal::Decimal;

use crate::Height;

/// Malformed input rejected synchronously, before any mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required string field was empty.
    #[error("field `{field}` must not be empty")]
    EmptyField {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A stake amount was negative.
    #[error("stake amount must be non-negative, got {amount}")]
    NegativeAmount {
        /// The rejected amount.
        amount: Decimal,
    },

    /// A stake duration was negative.
    #[error("stake duration must be non-negative, got {duration_secs}s")]
    NegativeDuration {
        /// The rejected duration in seconds.
        duration_secs: i64,
    },

    /// A height does not lie on the checkpoint grid.
    #[error("height {height} is off the grid (start {start}, interval {interval})")]
    OffGrid {
        /// The rejected height.
        height: Height,
        /// First height on the grid.
        start: Height,
        /// Spacing between grid heights.
        interval: u64,
    },

    /// A grid was configured with a zero interval.
    #[error("checkpoint interval must be positive")]
    ZeroInterval,

    /// The same height appeared twice in one batch write.
    #[error("duplicate height {height} in batch")]
    DuplicateHeight {
        /// The repeated height.
        height: Height,
    },

    /// A poll carried a different number of bucket universes than the
    /// archive was configured with.
    #[error("expected {expected} bucket universes, got {actual}")]
    UniverseCountMismatch {
        /// Universes the archive was built with.
        expected: usize,
        /// Universes supplied by the caller.
        actual: usize,
    },
}
