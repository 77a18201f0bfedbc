//! Height to mint-time mapping.
//!
//! Each committed height carries the wall-clock timestamp of its external
//! checkpoint (the "mint time"), used by the calculator for time-weighted
//! scoring and by callers resolving a timestamp to the nearest prior
//! height. Rows are first-writer-wins: re-submitting an existing height is
//! a silent no-op.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Row};

use quorum_types::Height;

use crate::codec::to_bigint;
use crate::error::StoreError;

/// Name of the mint-time table.
const TABLE: &str = "mint_times";

/// The height → mint-time index.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeIndex;

impl TimeIndex {
    /// Create the index.
    pub const fn new() -> Self {
        Self
    }

    /// Idempotently create the mint-time table.
    pub async fn create_table(&self, conn: &mut PgConnection) -> Result<(), StoreError> {
        sqlx::query(
            r"CREATE TABLE IF NOT EXISTS mint_times (
                height BIGINT PRIMARY KEY,
                mint_time TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Insert the mint time for a height. First writer wins; re-submitting
    /// an existing height leaves the stored time untouched.
    pub async fn put(
        &self,
        conn: &mut PgConnection,
        height: Height,
        time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO mint_times (height, mint_time) VALUES ($1, $2) ON CONFLICT (height) DO NOTHING",
        )
        .bind(to_bigint(height, "height")?)
        .bind(time)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// The mint time stored for exactly `height`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the height has no stored time --
    /// distinct from any zero-value convention.
    pub async fn get(
        &self,
        conn: &mut PgConnection,
        height: Height,
    ) -> Result<DateTime<Utc>, StoreError> {
        let row = sqlx::query("SELECT mint_time FROM mint_times WHERE height = $1")
            .bind(to_bigint(height, "height")?)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("mint time at height {height}")))?;
        Ok(row.try_get("mint_time")?)
    }

    /// The greatest stored height.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the index is empty.
    pub async fn tip_height(&self, conn: &mut PgConnection) -> Result<Height, StoreError> {
        let row = sqlx::query("SELECT MAX(height) AS height FROM mint_times")
            .fetch_one(conn)
            .await?;
        let height: Option<i64> = row.try_get("height")?;
        let height =
            height.ok_or_else(|| StoreError::NotFound(format!("{TABLE} is empty")))?;
        u64::try_from(height)
            .map_err(|_| StoreError::Integrity(format!("negative height in {TABLE}")))
    }

    /// The greatest stored height whose mint time is at or before `ts`.
    ///
    /// Refuses to extrapolate: unless at least one stored time is at or
    /// after `ts`, the answer could be stale, so it errors instead.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no stored time is ≤ `ts`, or if
    /// no stored time is ≥ `ts`.
    pub async fn height_before(
        &self,
        conn: &mut PgConnection,
        ts: DateTime<Utc>,
    ) -> Result<Height, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM mint_times WHERE mint_time >= $1) AS covered",
        )
        .bind(ts)
        .fetch_one(&mut *conn)
        .await?;
        let covered: bool = row.try_get("covered")?;
        if !covered {
            return Err(StoreError::NotFound(format!(
                "no stored mint time at or after {ts}; refusing to extrapolate"
            )));
        }

        let row = sqlx::query("SELECT MAX(height) AS height FROM mint_times WHERE mint_time <= $1")
            .bind(ts)
            .fetch_one(conn)
            .await?;
        let height: Option<i64> = row.try_get("height")?;
        let height = height
            .ok_or_else(|| StoreError::NotFound(format!("no stored mint time at or before {ts}")))?;
        u64::try_from(height)
            .map_err(|_| StoreError::Integrity(format!("negative height in {TABLE}")))
    }
}
