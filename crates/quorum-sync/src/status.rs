//! Derived orchestrator status.
//!
//! Status is not an explicit state machine: it is computed from the time
//! since the last successful commit, so a stalled external source shows up
//! as `Inactive` without any transition bookkeeping.

use std::time::{Duration, Instant};

/// Health of the sync loop, derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// No commit has ever succeeded.
    Starting,
    /// The last successful commit is within the staleness window.
    Active,
    /// The last successful commit exceeded the staleness window.
    Inactive,
}

/// Derive the status from the last successful commit instant.
pub(crate) fn derive(last_success: Option<Instant>, staleness: Duration) -> SyncStatus {
    match last_success {
        None => SyncStatus::Starting,
        Some(at) if at.elapsed() <= staleness => SyncStatus::Active,
        Some(_) => SyncStatus::Inactive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_succeeded_is_starting() {
        assert_eq!(derive(None, Duration::from_secs(60)), SyncStatus::Starting);
    }

    #[test]
    fn recent_success_is_active() {
        assert_eq!(
            derive(Some(Instant::now()), Duration::from_secs(60)),
            SyncStatus::Active
        );
    }

    #[test]
    fn stale_success_is_inactive() {
        let Some(old) = Instant::now().checked_sub(Duration::from_secs(120)) else {
            // Platform cannot represent the past instant; nothing to assert.
            return;
        };
        assert_eq!(derive(Some(old), Duration::from_secs(60)), SyncStatus::Inactive);
    }
}
