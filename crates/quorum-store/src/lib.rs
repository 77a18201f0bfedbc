//! Persistence layer for the Quorum poll archive (`PostgreSQL` + legacy KV).
//!
//! `PostgreSQL` holds the delta-deduplicated history: master record tables
//! keyed by content hash, per-height association rows, path-compressed
//! identical-to links, and the mint-time index. The legacy Redis-compatible
//! poll log is read once, during migration, behind a trait so its storage
//! model never leaks into the delta schema.
//!
//! # Architecture
//!
//! ```text
//! PollArchive (one transaction per write surface)
//!     |
//!     +-- DeltaRecordStore<RegistrationCodec>   (registrations)
//!     +-- DeltaRecordStore<BucketCodec> x N     (bucket universes)
//!     +-- TimeIndex                             (height -> mint time)
//!     |
//!     +-- migrate() <-- LegacyPollSource (KvPollSource over fred)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- Connection pool and configuration
//! - [`codec`] -- Per-kind storage strategies ([`RecordCodec`])
//! - [`delta_store`] -- The generic dedup/delta engine
//! - [`time_index`] -- Height → mint-time mapping
//! - [`archive`] -- The composed, transactional [`PollArchive`]
//! - [`legacy`] -- The legacy key-value poll log and migration source
//! - [`error`] -- Shared error types

pub mod archive;
pub mod codec;
pub mod delta_store;
pub mod error;
pub mod legacy;
pub mod postgres;
pub mod time_index;

// Re-export primary types for convenience.
pub use archive::{PollArchive, PollUpdate};
pub use codec::{BucketCodec, RecordCodec, RegistrationCodec};
pub use delta_store::DeltaRecordStore;
pub use error::StoreError;
pub use legacy::{KvPollSource, LegacyPoll, LegacyPollSource};
pub use postgres::PostgresConfig;
pub use time_index::TimeIndex;
