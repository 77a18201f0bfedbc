//! Shared type definitions for the Quorum poll archive.
//!
//! This crate is the single source of truth for the domain types used across
//! the Quorum workspace: candidate registrations, stake buckets, content
//! hashes, height-grid arithmetic, and derived election results.
//!
//! # Modules
//!
//! - [`hash`] -- Content addressing: [`ContentHash`] and [`ContentAddressed`]
//! - [`record`] -- The two record kinds: [`Registration`] and [`Bucket`]
//! - [`batch`] -- [`RecordBatch`]: the tagged no-change/empty/explicit variant
//! - [`grid`] -- [`HeightGrid`]: checkpoint spacing and grid validation
//! - [`result`] -- Derived election results: [`Delegate`], [`Vote`],
//!   [`ElectionResult`]
//! - [`error`] -- [`ValidationError`] shared by the archive and calculator

pub mod batch;
pub mod error;
pub mod grid;
pub mod hash;
pub mod record;
pub mod result;

// Re-export all public types at crate root for convenience.
pub use batch::RecordBatch;
pub use error::ValidationError;
pub use grid::HeightGrid;
pub use hash::{ContentAddressed, ContentHash};
pub use record::{Bucket, Registration};
pub use result::{Delegate, ElectionResult, Vote};

/// Monotonic checkpoint identifier from the external source.
///
/// Heights are spaced at a fixed interval (see [`HeightGrid`]) and are
/// append-only: once a height is committed to the archive it is never
/// mutated.
pub type Height = u64;
