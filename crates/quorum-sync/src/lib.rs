//! Sync orchestration between the external checkpoint chain and the poll
//! archive.
//!
//! # Architecture
//!
//! ```text
//!   ChainReader (trait) ──fetch──▶ worker pool ──commit──▶ Archive (trait)
//!        │                        (semaphore-bounded,          │
//!        │ new-height              per-height retry)           │
//!        └──notify──▶ SyncOrchestrator ◀──────read─────────────┘
//!                           │
//!                           ├─ ResultCalculator (per height, on demand)
//!                           ├─ ResultCorrector  (historical overrides)
//!                           └─ LRU result cache
//! ```
//!
//! | Module         | Responsibility                                      |
//! |----------------|-----------------------------------------------------|
//! | `reader`       | [`ChainReader`]: the external source boundary       |
//! | `archive`      | [`Archive`]: the storage boundary                   |
//! | `fetch`        | Per-height paginated fetch with retries             |
//! | `orchestrator` | Catch-up loop, worker pool, cached result reads     |
//! | `correction`   | Data-driven historical result overrides             |
//! | `status`       | Derived liveness status                             |
//! | `error`        | [`FetchError`] (transient) vs [`SyncError`] (fatal) |

mod archive;
mod correction;
mod error;
mod fetch;
mod orchestrator;
mod reader;
mod status;

pub use archive::Archive;
pub use correction::{NoCorrections, ResultCorrector, ScoreOverrides};
pub use error::{FetchError, SyncError};
pub use orchestrator::{SyncConfig, SyncOrchestrator};
pub use reader::ChainReader;
pub use status::SyncStatus;
