//! Data-driven corrections for known historical results.
//!
//! A handful of external heights carry compatibility fixes: scores that
//! must differ from what the calculator produces, agreed upon when the
//! upstream system patched past mistakes. Those live in a correction
//! table keyed by height -- data, not inline conditionals -- so the next
//! one-off patch is a table entry, never a core code change.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use quorum_types::{ElectionResult, Height};

/// Applies per-height compatibility fixes to a freshly-calculated result.
pub trait ResultCorrector: Send + Sync {
    /// Adjust `result` in place if `height` carries corrections.
    fn correct(&self, height: Height, result: &mut ElectionResult);
}

/// The identity corrector.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCorrections;

impl ResultCorrector for NoCorrections {
    fn correct(&self, _height: Height, _result: &mut ElectionResult) {}
}

/// A correction table overriding specific delegates' scores at specific
/// heights. Delegates are re-ranked after the overrides apply.
#[derive(Debug, Clone, Default)]
pub struct ScoreOverrides {
    overrides: BTreeMap<Height, Vec<(String, Decimal)>>,
}

impl ScoreOverrides {
    /// An empty table.
    pub const fn new() -> Self {
        Self {
            overrides: BTreeMap::new(),
        }
    }

    /// Add one override: at `height`, the named delegate's score becomes
    /// `score`.
    #[must_use]
    pub fn with_override(mut self, height: Height, name: &str, score: Decimal) -> Self {
        self.overrides
            .entry(height)
            .or_default()
            .push((name.to_owned(), score));
        self
    }

    /// Number of heights carrying at least one override.
    pub fn corrected_heights(&self) -> usize {
        self.overrides.len()
    }
}

impl ResultCorrector for ScoreOverrides {
    fn correct(&self, height: Height, result: &mut ElectionResult) {
        let Some(entries) = self.overrides.get(&height) else {
            return;
        };
        let mut touched = false;
        for (name, score) in entries {
            if let Some(delegate) = result.delegates.iter_mut().find(|d| &d.name == name) {
                tracing::info!(height, name, %score, "Applying historical score override");
                delegate.score = *score;
                touched = true;
            }
        }
        if touched {
            // Re-rank; overridden scores are distinct by construction, so
            // the name fallback keeps the order total.
            result
                .delegates
                .sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        }
    }
}
