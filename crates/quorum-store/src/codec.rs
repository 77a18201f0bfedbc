//! Per-kind storage strategies behind one capability interface.
//!
//! The delta store's dedup and link-resolution logic is written once,
//! generically; everything kind-specific -- master-table columns, the
//! batched insert, row decoding -- lives behind [`RecordCodec`]. The two
//! strategies, [`RegistrationCodec`] and [`BucketCodec`], are selected at
//! store construction. There is no runtime type switching.
//!
//! Master tables share two fixed columns the generic layer relies on:
//! `id BIGSERIAL` and `content_hash BYTEA UNIQUE`. The codec owns the rest.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};

use quorum_types::{Bucket, ContentAddressed, ContentHash, Registration};

use crate::error::StoreError;

/// Kind-specific storage operations for one record type.
///
/// Implementations must keep inserts idempotent (`ON CONFLICT DO NOTHING`
/// on the content hash): the master table is append-only and a record row,
/// once created, is never deleted.
pub trait RecordCodec: Send + Sync {
    /// The record type this codec stores.
    type Record: ContentAddressed + Clone + Send + Sync;

    /// Table-name prefix for this collection (e.g. `registrations`,
    /// `contract_buckets`). Must be a valid lowercase SQL identifier; the
    /// delta store derives `{kind}_records`, `{kind}_heights`, and
    /// `{kind}_identical` from it.
    fn kind(&self) -> &str;

    /// Idempotently create the master table.
    fn create_master_table(
        &self,
        conn: &mut PgConnection,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Insert-or-ignore a batch of records keyed by content hash.
    ///
    /// Callers pass each distinct record once; multiplicity is tracked in
    /// the association table, never as duplicate master rows.
    fn insert_records(
        &self,
        conn: &mut PgConnection,
        records: &[(ContentHash, Self::Record)],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Fetch records by master-table id.
    fn records_by_ids(
        &self,
        conn: &mut PgConnection,
        ids: &[i64],
    ) -> impl Future<Output = Result<BTreeMap<i64, Self::Record>, StoreError>> + Send;
}

/// Convert a `u64` domain value to the `BIGINT` column type.
pub(crate) fn to_bigint(value: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Integrity(format!("{what} exceeds BIGINT range")))
}

// ---------------------------------------------------------------------------
// Registrations
// ---------------------------------------------------------------------------

/// Storage strategy for [`Registration`] records.
#[derive(Debug, Clone)]
pub struct RegistrationCodec {
    kind: String,
}

impl RegistrationCodec {
    /// Create the strategy with its table-name prefix.
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_owned(),
        }
    }
}

impl Default for RegistrationCodec {
    fn default() -> Self {
        Self::new("registrations")
    }
}

impl RecordCodec for RegistrationCodec {
    type Record = Registration;

    fn kind(&self) -> &str {
        &self.kind
    }

    async fn create_master_table(&self, conn: &mut PgConnection) -> Result<(), StoreError> {
        let sql = format!(
            r"CREATE TABLE IF NOT EXISTS {kind}_records (
                id BIGSERIAL PRIMARY KEY,
                content_hash BYTEA NOT NULL UNIQUE,
                name TEXT NOT NULL,
                address TEXT NOT NULL,
                operator_address TEXT NOT NULL,
                reward_address TEXT NOT NULL,
                self_stake_weight BIGINT NOT NULL
            )",
            kind = self.kind
        );
        sqlx::query(&sql).execute(conn).await?;
        Ok(())
    }

    async fn insert_records(
        &self,
        conn: &mut PgConnection,
        records: &[(ContentHash, Registration)],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        // Pre-allocate arrays for the UNNEST-based batch insert: one
        // INSERT with N value tuples instead of N round-trips.
        let len = records.len();
        let mut hashes: Vec<Vec<u8>> = Vec::with_capacity(len);
        let mut names = Vec::with_capacity(len);
        let mut addresses = Vec::with_capacity(len);
        let mut operators = Vec::with_capacity(len);
        let mut rewards = Vec::with_capacity(len);
        let mut weights = Vec::with_capacity(len);
        for (hash, reg) in records {
            hashes.push(hash.as_bytes().to_vec());
            names.push(reg.name.clone());
            addresses.push(reg.address.clone());
            operators.push(reg.operator_address.clone());
            rewards.push(reg.reward_address.clone());
            weights.push(to_bigint(reg.self_stake_weight, "self_stake_weight")?);
        }

        let sql = format!(
            r"INSERT INTO {kind}_records
                (content_hash, name, address, operator_address, reward_address, self_stake_weight)
              SELECT * FROM UNNEST($1::BYTEA[], $2::TEXT[], $3::TEXT[], $4::TEXT[], $5::TEXT[], $6::BIGINT[])
              ON CONFLICT (content_hash) DO NOTHING",
            kind = self.kind
        );
        sqlx::query(&sql)
            .bind(&hashes)
            .bind(&names)
            .bind(&addresses)
            .bind(&operators)
            .bind(&rewards)
            .bind(&weights)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn records_by_ids(
        &self,
        conn: &mut PgConnection,
        ids: &[i64],
    ) -> Result<BTreeMap<i64, Registration>, StoreError> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let sql = format!(
            r"SELECT id, name, address, operator_address, reward_address, self_stake_weight
              FROM {kind}_records WHERE id = ANY($1)",
            kind = self.kind
        );
        let rows = sqlx::query(&sql).bind(ids).fetch_all(conn).await?;
        rows.into_iter()
            .map(|row| decode_registration(&row))
            .collect()
    }
}

fn decode_registration(row: &PgRow) -> Result<(i64, Registration), StoreError> {
    let id: i64 = row.try_get("id")?;
    let weight: i64 = row.try_get("self_stake_weight")?;
    let self_stake_weight = u64::try_from(weight)
        .map_err(|_| StoreError::Integrity(format!("negative self_stake_weight in row {id}")))?;
    Ok((
        id,
        Registration {
            name: row.try_get("name")?,
            address: row.try_get("address")?,
            operator_address: row.try_get("operator_address")?,
            reward_address: row.try_get("reward_address")?,
            self_stake_weight,
        },
    ))
}

// ---------------------------------------------------------------------------
// Buckets
// ---------------------------------------------------------------------------

/// Storage strategy for [`Bucket`] records.
///
/// Several bucket universes (e.g. contract-sourced versus natively staked)
/// coexist as separate instances with distinct kinds.
#[derive(Debug, Clone)]
pub struct BucketCodec {
    kind: String,
}

impl BucketCodec {
    /// Create the strategy with its table-name prefix.
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_owned(),
        }
    }
}

impl RecordCodec for BucketCodec {
    type Record = Bucket;

    fn kind(&self) -> &str {
        &self.kind
    }

    async fn create_master_table(&self, conn: &mut PgConnection) -> Result<(), StoreError> {
        let sql = format!(
            r"CREATE TABLE IF NOT EXISTS {kind}_records (
                id BIGSERIAL PRIMARY KEY,
                content_hash BYTEA NOT NULL UNIQUE,
                start_time TIMESTAMPTZ NOT NULL,
                duration_secs BIGINT NOT NULL,
                amount NUMERIC NOT NULL,
                decay BOOLEAN NOT NULL,
                voter TEXT NOT NULL,
                candidate TEXT NOT NULL
            )",
            kind = self.kind
        );
        sqlx::query(&sql).execute(conn).await?;
        Ok(())
    }

    async fn insert_records(
        &self,
        conn: &mut PgConnection,
        records: &[(ContentHash, Bucket)],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let len = records.len();
        let mut hashes: Vec<Vec<u8>> = Vec::with_capacity(len);
        let mut starts: Vec<DateTime<Utc>> = Vec::with_capacity(len);
        let mut durations = Vec::with_capacity(len);
        let mut amounts: Vec<Decimal> = Vec::with_capacity(len);
        let mut decays = Vec::with_capacity(len);
        let mut voters = Vec::with_capacity(len);
        let mut candidates = Vec::with_capacity(len);
        for (hash, bucket) in records {
            hashes.push(hash.as_bytes().to_vec());
            starts.push(bucket.start_time);
            durations.push(bucket.duration_secs);
            amounts.push(bucket.amount);
            decays.push(bucket.decay);
            voters.push(bucket.voter.clone());
            candidates.push(bucket.candidate.clone());
        }

        let sql = format!(
            r"INSERT INTO {kind}_records
                (content_hash, start_time, duration_secs, amount, decay, voter, candidate)
              SELECT * FROM UNNEST($1::BYTEA[], $2::TIMESTAMPTZ[], $3::BIGINT[], $4::NUMERIC[], $5::BOOLEAN[], $6::TEXT[], $7::TEXT[])
              ON CONFLICT (content_hash) DO NOTHING",
            kind = self.kind
        );
        sqlx::query(&sql)
            .bind(&hashes)
            .bind(&starts)
            .bind(&durations)
            .bind(&amounts)
            .bind(&decays)
            .bind(&voters)
            .bind(&candidates)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn records_by_ids(
        &self,
        conn: &mut PgConnection,
        ids: &[i64],
    ) -> Result<BTreeMap<i64, Bucket>, StoreError> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let sql = format!(
            r"SELECT id, start_time, duration_secs, amount, decay, voter, candidate
              FROM {kind}_records WHERE id = ANY($1)",
            kind = self.kind
        );
        let rows = sqlx::query(&sql).bind(ids).fetch_all(conn).await?;
        rows.into_iter().map(|row| decode_bucket(&row)).collect()
    }
}

fn decode_bucket(row: &PgRow) -> Result<(i64, Bucket), StoreError> {
    let id: i64 = row.try_get("id")?;
    Ok((
        id,
        Bucket {
            start_time: row.try_get("start_time")?,
            duration_secs: row.try_get("duration_secs")?,
            amount: row.try_get("amount")?,
            decay: row.try_get("decay")?,
            voter: row.try_get("voter")?,
            candidate: row.try_get("candidate")?,
        },
    ))
}
