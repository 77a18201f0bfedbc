//! Derived election results.
//!
//! An [`ElectionResult`] is computed from a stored snapshot; it is cached by
//! the sync layer but never persisted. Delegates are ordered by score
//! descending with a deterministic tie-break, so identical inputs always
//! reproduce an identical result.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One scored vote attributed to a delegate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Address of the staking voter.
    pub voter: String,
    /// Staked amount, after self-stake amplification where applicable.
    pub amount: Decimal,
    /// Time-weighted score contributed by this vote.
    pub score: Decimal,
    /// Whether the voter is the candidate itself.
    pub is_self_stake: bool,
}

/// A candidate that survived filtering, with its accumulated votes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegate {
    /// Candidate name.
    pub name: String,
    /// Operator address from the registration.
    pub operator_address: String,
    /// Reward address from the registration.
    pub reward_address: String,
    /// Self-stake multiplier from the registration.
    pub self_stake_weight: u64,
    /// Total accumulated score across this delegate's votes.
    pub score: Decimal,
    /// Amount the delegate staked on itself (after amplification).
    pub self_staked: Decimal,
    /// Every vote attributed to this delegate, in insertion order.
    pub votes: Vec<Vote>,
}

/// The ranked outcome of one checkpoint's election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionResult {
    /// Mint time of the snapshot the result was computed from.
    pub mint_time: DateTime<Utc>,
    /// Delegates ordered by score descending (deterministic tie-break).
    pub delegates: Vec<Delegate>,
    /// Sum of all vote scores, including votes naming unknown candidates.
    pub total_votes: Decimal,
    /// Sum of all voted stake amounts, including unknown-candidate stakes.
    pub total_voted_stakes: Decimal,
}

impl ElectionResult {
    /// Look up a delegate by name.
    pub fn delegate(&self, name: &str) -> Option<&Delegate> {
        self.delegates.iter().find(|d| d.name == name)
    }
}
