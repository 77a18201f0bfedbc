//! The two record kinds persisted by the archive.
//!
//! Records are immutable values: once committed at a height they are never
//! modified, and the same value recurring across heights is stored once,
//! keyed by its content hash. Both kinds carry a hand-written canonical
//! encoding (see [`ContentAddressed`]) so that hashing is independent of the
//! serde format used for payload transport.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::hash::{put_field, ContentAddressed};

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// A candidate registration as observed at a checkpoint.
///
/// Candidate names are unique within a snapshot; a duplicate name is a fatal
/// integrity error at calculation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Unique candidate name.
    pub name: String,
    /// The candidate's own address. Buckets whose voter equals this address
    /// are self-stakes and are amplified by `self_stake_weight`.
    pub address: String,
    /// Address of the operator running the candidate's node.
    pub operator_address: String,
    /// Address receiving the candidate's rewards.
    pub reward_address: String,
    /// Multiplier applied to the candidate's own stake during scoring.
    pub self_stake_weight: u64,
}

impl Registration {
    /// Check structural validity: names and addresses must be non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyField`] naming the offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("name", &self.name),
            ("address", &self.address),
            ("operator_address", &self.operator_address),
            ("reward_address", &self.reward_address),
        ] {
            if value.is_empty() {
                return Err(ValidationError::EmptyField { field });
            }
        }
        Ok(())
    }
}

impl ContentAddressed for Registration {
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        put_field(&mut out, self.name.as_bytes());
        put_field(&mut out, self.address.as_bytes());
        put_field(&mut out, self.operator_address.as_bytes());
        put_field(&mut out, self.reward_address.as_bytes());
        out.extend_from_slice(&self.self_stake_weight.to_be_bytes());
        out
    }
}

// ---------------------------------------------------------------------------
// Bucket
// ---------------------------------------------------------------------------

/// A stake bucket: one voter's stake backing one candidate.
///
/// Amounts are [`Decimal`] -- wide enough for stakes beyond the 64-bit
/// integer range, with no floating point anywhere in accounting. The same
/// bucket value may legitimately recur at one height (two identical stakes
/// from the same voter); the store tracks that as a multiplicity count, not
/// duplicate rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// When the stake becomes active.
    pub start_time: DateTime<Utc>,
    /// Staking duration in seconds.
    pub duration_secs: i64,
    /// Staked amount. Non-negative.
    pub amount: Decimal,
    /// Whether the stake's weight decays as the duration elapses.
    pub decay: bool,
    /// Address of the staking voter.
    pub voter: String,
    /// Name of the candidate this stake backs. May be empty (an unassigned
    /// stake), in which case the bucket is ignored by the calculator.
    pub candidate: String,
}

impl Bucket {
    /// Check structural validity: amount and duration must be non-negative
    /// and the voter must be non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NegativeAmount`],
    /// [`ValidationError::NegativeDuration`], or
    /// [`ValidationError::EmptyField`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.amount.is_sign_negative() {
            return Err(ValidationError::NegativeAmount {
                amount: self.amount,
            });
        }
        if self.duration_secs < 0 {
            return Err(ValidationError::NegativeDuration {
                duration_secs: self.duration_secs,
            });
        }
        if self.voter.is_empty() {
            return Err(ValidationError::EmptyField { field: "voter" });
        }
        Ok(())
    }

    /// The instant the stake stops accruing weight.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + chrono::Duration::seconds(self.duration_secs)
    }
}

impl ContentAddressed for Bucket {
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&self.start_time.timestamp().to_be_bytes());
        out.extend_from_slice(&self.duration_secs.to_be_bytes());
        // Normalize so 1.0 and 1.00 hash identically.
        out.extend_from_slice(&self.amount.normalize().serialize());
        out.push(u8::from(self.decay));
        put_field(&mut out, self.voter.as_bytes());
        put_field(&mut out, self.candidate.as_bytes());
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use chrono::TimeZone;

    use super::*;

    fn bucket() -> Bucket {
        Bucket {
            start_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            duration_secs: 86_400,
            amount: Decimal::new(100, 0),
            decay: true,
            voter: "voter-1".to_owned(),
            candidate: "alpha".to_owned(),
        }
    }

    #[test]
    fn equal_records_hash_equal() {
        assert_eq!(bucket().content_hash(), bucket().content_hash());
    }

    #[test]
    fn any_field_change_alters_hash() {
        let base = bucket().content_hash();
        let mut b = bucket();
        b.decay = false;
        assert_ne!(base, b.content_hash());
        let mut b = bucket();
        b.amount = Decimal::new(101, 0);
        assert_ne!(base, b.content_hash());
        let mut b = bucket();
        b.candidate = "beta".to_owned();
        assert_ne!(base, b.content_hash());
    }

    #[test]
    fn normalized_amounts_hash_equal() {
        let mut a = bucket();
        a.amount = Decimal::from_str("100").unwrap();
        let mut b = bucket();
        b.amount = Decimal::from_str("100.00").unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn serde_round_trip_preserves_wide_amounts() {
        // An amount far beyond u64::MAX must survive a JSON round trip.
        let mut b = bucket();
        b.amount = Decimal::from_str("79228162514264337593543950335").unwrap();
        let json = serde_json::to_string(&b).unwrap();
        let restored: Bucket = serde_json::from_str(&json).unwrap();
        assert_eq!(b, restored);
        assert_eq!(b.content_hash(), restored.content_hash());
    }

    #[test]
    fn registration_round_trip() {
        let reg = Registration {
            name: "alpha".to_owned(),
            address: "addr-a".to_owned(),
            operator_address: "op-a".to_owned(),
            reward_address: "rw-a".to_owned(),
            self_stake_weight: 3,
        };
        let json = serde_json::to_string(&reg).unwrap();
        let restored: Registration = serde_json::from_str(&json).unwrap();
        assert_eq!(reg, restored);
    }

    #[test]
    fn negative_amount_rejected() {
        let mut b = bucket();
        b.amount = Decimal::new(-1, 0);
        assert!(matches!(
            b.validate(),
            Err(ValidationError::NegativeAmount { .. })
        ));
    }

    #[test]
    fn negative_duration_rejected() {
        let mut b = bucket();
        b.duration_secs = -1;
        assert!(matches!(
            b.validate(),
            Err(ValidationError::NegativeDuration { .. })
        ));
    }

    #[test]
    fn field_order_is_not_ambiguous() {
        // Length prefixes prevent adjacent string fields from gluing:
        // ("ab", "c") must not collide with ("a", "bc").
        let mut a = bucket();
        a.voter = "ab".to_owned();
        a.candidate = "c".to_owned();
        let mut b = bucket();
        b.voter = "a".to_owned();
        b.candidate = "bc".to_owned();
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
