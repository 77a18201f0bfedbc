//! The default time-weighted scoring function.
//!
//! A bucket's score grows logarithmically with the staking time remaining
//! at evaluation: each bucket is worth its amount times a weight of
//! `1 + ln(ceil(remaining_days)) / ln(1.2) / 100`, floored to a whole
//! score. A stake evaluated before its start time scores zero; a decaying
//! stake's remaining time shrinks as the mint time advances, while a
//! non-decaying stake always counts its full duration.
//!
//! All accounting stays in [`Decimal`]; only the logarithmic weight factor
//! itself is computed in `f64`, then folded back before the floor.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use quorum_types::Bucket;

/// Seconds per staking day.
const SECS_PER_DAY: f64 = 86_400.0;

/// Base of the logarithmic weight curve.
const WEIGHT_LOG_BASE: f64 = 1.2;

/// Divisor flattening the weight curve.
const WEIGHT_SCALE: f64 = 100.0;

/// Score `bucket` as of `now` (normally the snapshot's mint time).
///
/// Monotonic in the staked amount. The floor guarantees whole-number
/// scores, so equal-amount short stakes tie exactly instead of differing
/// by float noise.
pub fn time_weighted_score(bucket: &Bucket, now: DateTime<Utc>) -> Decimal {
    if now < bucket.start_time {
        return Decimal::ZERO;
    }

    let remaining_secs = if bucket.decay {
        let end = bucket.end_time();
        (end - now).num_seconds().max(0)
    } else {
        bucket.duration_secs
    };

    if remaining_secs <= 0 {
        return bucket.amount.floor();
    }

    let remaining = f64::from(u32::try_from(remaining_secs).unwrap_or(u32::MAX));
    let days = (remaining / SECS_PER_DAY).ceil();
    let weight = 1.0 + days.ln() / WEIGHT_LOG_BASE.ln() / WEIGHT_SCALE;

    let weight = Decimal::from_f64(weight).unwrap_or(Decimal::ONE);
    bucket
        .amount
        .checked_mul(weight)
        .unwrap_or(Decimal::MAX)
        .floor()
}
