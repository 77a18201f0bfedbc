//! Checkpoint-grid arithmetic.
//!
//! Heights from the external source are spaced at a fixed interval starting
//! from a configured first height. Both the archive and the sync
//! orchestrator validate heights against the grid before touching storage.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::Height;

/// The set of valid checkpoint heights: `start, start + interval, ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightGrid {
    start: Height,
    interval: u64,
}

impl HeightGrid {
    /// Create a grid from its first height and spacing.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ZeroInterval`] if `interval` is zero.
    pub const fn new(start: Height, interval: u64) -> Result<Self, ValidationError> {
        if interval == 0 {
            return Err(ValidationError::ZeroInterval);
        }
        Ok(Self { start, interval })
    }

    /// The first height on the grid.
    pub const fn start(&self) -> Height {
        self.start
    }

    /// The spacing between consecutive grid heights.
    pub const fn interval(&self) -> u64 {
        self.interval
    }

    /// Whether `height` lies on the grid.
    pub const fn contains(&self, height: Height) -> bool {
        match height.checked_sub(self.start) {
            Some(offset) => offset % self.interval == 0,
            None => false,
        }
    }

    /// Validate that `height` lies on the grid.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::OffGrid`] otherwise.
    pub const fn check(&self, height: Height) -> Result<(), ValidationError> {
        if self.contains(height) {
            Ok(())
        } else {
            Err(ValidationError::OffGrid {
                height,
                start: self.start,
                interval: self.interval,
            })
        }
    }

    /// The grid height after `height`, or `None` on overflow.
    pub const fn next(&self, height: Height) -> Option<Height> {
        height.checked_add(self.interval)
    }

    /// The grid height before `height`, or `None` at or below the start.
    pub const fn prev(&self, height: Height) -> Option<Height> {
        if height <= self.start {
            None
        } else {
            height.checked_sub(self.interval)
        }
    }
}
