//! Deterministic election tallying for the Quorum poll archive.
//!
//! A [`ResultCalculator`] turns one height's snapshot (registrations +
//! buckets) and its mint time into a ranked [`ElectionResult`]. The
//! calculation is pure and write-once: registrations first, then buckets,
//! then a single `calculate` that consumes the calculator -- identical
//! inputs always reproduce a byte-identical result.
//!
//! # Modules
//!
//! - [`calculator`] -- The write-once [`ResultCalculator`] and its hooks
//! - [`score`] -- The default time-weighted scoring function
//! - [`error`] -- [`RankingError`]
//!
//! # Invariants
//!
//! 1. Registrations are added before any bucket (votes must resolve
//!    against a complete candidate set).
//! 2. A duplicate candidate name is fatal.
//! 3. Self-stakes are amplified by the candidate's self-stake weight.
//! 4. Ordering is a strict total order: score descending, then a
//!    deterministic digest of (name, mint-time epoch seconds).
//!
//! [`ElectionResult`]: quorum_types::ElectionResult

pub mod calculator;
pub mod error;
pub mod score;

// Re-export primary types for convenience.
pub use calculator::{CalculatorConfig, ResultCalculator};
pub use error::RankingError;
pub use score::time_weighted_score;
