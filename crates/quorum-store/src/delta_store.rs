//! The generic content-addressed, height-indexed delta store.
//!
//! One store persists one collection kind (registrations or one bucket
//! universe) across heights. Storage cost is proportional to change, not to
//! time: unseen record values are inserted once into the master table, a
//! height whose collection differs from its predecessor's stores the id set
//! (plus multiplicities), and a height whose collection is byte-identical
//! to its predecessor's stores only a back-pointer.
//!
//! # Identical-to links
//!
//! Links are path-compressed: they always point at a height holding an
//! explicit association row, never at another link, so reads resolve in at
//! most one hop no matter how long a run of unchanged heights grows.
//!
//! # Tables (per kind)
//!
//! | Table | Columns |
//! |-------|---------|
//! | `{kind}_records` | `id`, `content_hash UNIQUE`, kind-specific fields |
//! | `{kind}_heights` | `height PK`, `ids BIGINT[]`, `frequencies JSONB` |
//! | `{kind}_identical` | `height PK`, `identical_to BIGINT` |
//!
//! `frequencies` stores only multiplicities greater than one; absent ids
//! default to a count of one on read.

use std::collections::BTreeMap;

use sqlx::{PgConnection, Row};

use quorum_types::{ContentAddressed, ContentHash, Height, RecordBatch};

use crate::codec::{to_bigint, RecordCodec};
use crate::error::StoreError;

/// A per-record-id multiplicity map. Only counts above one are persisted.
type Frequencies = BTreeMap<i64, u32>;

/// Content-deduplicated delta store for one collection kind.
///
/// All methods take an open connection (typically a transaction handle);
/// the store never begins or commits transactions itself. Heights within
/// one logical batch must be applied strictly ascending inside a single
/// transaction so each `put` observes a consistent predecessor.
#[derive(Debug, Clone)]
pub struct DeltaRecordStore<C: RecordCodec> {
    codec: C,
    records_table: String,
    heights_table: String,
    identical_table: String,
}

impl<C: RecordCodec> DeltaRecordStore<C> {
    /// Create a store over the given per-kind strategy.
    pub fn new(codec: C) -> Self {
        let kind = codec.kind().to_owned();
        Self {
            records_table: format!("{kind}_records"),
            heights_table: format!("{kind}_heights"),
            identical_table: format!("{kind}_identical"),
            codec,
        }
    }

    /// The collection kind this store persists.
    pub fn kind(&self) -> &str {
        self.codec.kind()
    }

    /// Idempotently create the master, association, and identical-to tables.
    pub async fn create_tables(&self, conn: &mut PgConnection) -> Result<(), StoreError> {
        self.codec.create_master_table(conn).await?;
        let heights = format!(
            r"CREATE TABLE IF NOT EXISTS {table} (
                height BIGINT PRIMARY KEY,
                ids BIGINT[] NOT NULL,
                frequencies JSONB
            )",
            table = self.heights_table
        );
        sqlx::query(&heights).execute(&mut *conn).await?;
        let identical = format!(
            r"CREATE TABLE IF NOT EXISTS {table} (
                height BIGINT PRIMARY KEY,
                identical_to BIGINT NOT NULL
            )",
            table = self.identical_table
        );
        sqlx::query(&identical).execute(&mut *conn).await?;
        Ok(())
    }

    /// Persist the collection valid at `height`.
    ///
    /// [`RecordBatch::NoChange`], or a collection whose (hash, count)
    /// multiset equals the predecessor's (including both empty), writes
    /// only an identical-to row pointing at the predecessor's *resolved*
    /// height. Anything else inserts previously-unseen record values into
    /// the master table and writes an explicit association row.
    ///
    /// A `NoChange` at a height with no explicitly-stored predecessor
    /// degrades to an explicit empty collection: every identical-to chain
    /// must terminate at explicit data.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Integrity`] if hash-to-id resolution yields
    /// fewer ids than distinct hashes were inserted; the caller must roll
    /// back the enclosing transaction.
    pub async fn put(
        &self,
        conn: &mut PgConnection,
        height: Height,
        batch: &RecordBatch<C::Record>,
    ) -> Result<(), StoreError> {
        let target = to_bigint(height, "height")?;
        let predecessor = self.resolved_predecessor(conn, target).await?;

        let Some(records) = batch.explicit_records() else {
            // No data signal: identical to the predecessor, or -- at the
            // very first height -- an explicit empty collection.
            return match predecessor {
                Some(prior) => self.put_identical(conn, target, prior).await,
                None => self.put_association(conn, target, &[], &Frequencies::new()).await,
            };
        };

        // Hash each record and collapse duplicates into counts.
        let mut counts: BTreeMap<ContentHash, u32> = BTreeMap::new();
        let mut distinct: Vec<(ContentHash, C::Record)> = Vec::new();
        for record in records {
            let hash = record.content_hash();
            let count = counts.entry(hash).or_insert(0);
            if *count == 0 {
                distinct.push((hash, record.clone()));
            }
            *count = count.saturating_add(1);
        }

        self.codec.insert_records(conn, &distinct).await?;

        if let Some(prior) = predecessor {
            let prior_counts = self.multiset_at(conn, prior).await?;
            if prior_counts == counts {
                return self.put_identical(conn, target, prior).await;
            }
        } else if counts.is_empty() {
            return self.put_association(conn, target, &[], &Frequencies::new()).await;
        }

        // Resolve hashes to master ids and record multiplicities > 1.
        let id_by_hash = self.ids_for_hashes(conn, &counts).await?;
        let mut ids: Vec<i64> = id_by_hash.values().copied().collect();
        ids.sort_unstable();
        let mut frequencies = Frequencies::new();
        for (hash, count) in &counts {
            if *count > 1 {
                if let Some(id) = id_by_hash.get(hash) {
                    frequencies.insert(*id, *count);
                }
            }
        }
        self.put_association(conn, target, &ids, &frequencies).await
    }

    /// Read the collection valid at `height`, expanding multiplicities.
    ///
    /// Resolves at most one identical-to hop. Records are returned in
    /// master-id order, duplicates adjacent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the height holds neither an
    /// association nor an identical-to row.
    pub async fn get(
        &self,
        conn: &mut PgConnection,
        height: Height,
    ) -> Result<Vec<C::Record>, StoreError> {
        let target = to_bigint(height, "height")?;
        let resolved = self.follow_identical(conn, target).await?.unwrap_or(target);

        let sql = format!(
            "SELECT ids, frequencies FROM {table} WHERE height = $1",
            table = self.heights_table
        );
        let row = sqlx::query(&sql)
            .bind(resolved)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!("{} at height {height}", self.kind()))
            })?;

        let ids: Vec<i64> = row.try_get("ids")?;
        let frequencies: Frequencies = row
            .try_get::<Option<serde_json::Value>, _>("frequencies")?
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        let by_id = self.codec.records_by_ids(conn, &ids).await?;
        if by_id.len() != ids.len() {
            return Err(StoreError::Integrity(format!(
                "{}: height {height} references {} ids but {} records resolved",
                self.kind(),
                ids.len(),
                by_id.len()
            )));
        }

        let mut out = Vec::with_capacity(ids.len());
        for (id, record) in by_id {
            let count = frequencies.get(&id).copied().unwrap_or(1);
            for _ in 0..count {
                out.push(record.clone());
            }
        }
        Ok(out)
    }

    /// The explicitly-stored height an identical-to row at `height` points
    /// at, if one exists.
    pub async fn identical_target(
        &self,
        conn: &mut PgConnection,
        height: Height,
    ) -> Result<Option<Height>, StoreError> {
        let target = to_bigint(height, "height")?;
        let resolved = self.follow_identical(conn, target).await?;
        resolved
            .map(|h| {
                u64::try_from(h)
                    .map_err(|_| StoreError::Integrity(format!("negative identical_to for {height}")))
            })
            .transpose()
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    /// Greatest height below `target` with any stored row, resolved through
    /// its identical-to link (at most one hop by the path-compression
    /// invariant) to a height holding an explicit association.
    ///
    /// Not simply `target - interval`: heights with no activity leave gaps.
    async fn resolved_predecessor(
        &self,
        conn: &mut PgConnection,
        target: i64,
    ) -> Result<Option<i64>, StoreError> {
        let sql = format!(
            r"SELECT MAX(height) AS height FROM (
                SELECT height FROM {heights} WHERE height < $1
                UNION ALL
                SELECT height FROM {identical} WHERE height < $1
              ) AS known",
            heights = self.heights_table,
            identical = self.identical_table
        );
        let row = sqlx::query(&sql).bind(target).fetch_one(&mut *conn).await?;
        let Some(nearest) = row.try_get::<Option<i64>, _>("height")? else {
            return Ok(None);
        };
        Ok(Some(
            self.follow_identical(conn, nearest).await?.unwrap_or(nearest),
        ))
    }

    /// If `height` holds an identical-to row, the height it points at.
    async fn follow_identical(
        &self,
        conn: &mut PgConnection,
        height: i64,
    ) -> Result<Option<i64>, StoreError> {
        let sql = format!(
            "SELECT identical_to FROM {table} WHERE height = $1",
            table = self.identical_table
        );
        let row = sqlx::query(&sql)
            .bind(height)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(|r| r.try_get("identical_to")).transpose().map_err(StoreError::from)
    }

    /// The (hash, count) multiset stored at an explicit height.
    async fn multiset_at(
        &self,
        conn: &mut PgConnection,
        height: i64,
    ) -> Result<BTreeMap<ContentHash, u32>, StoreError> {
        let sql = format!(
            "SELECT ids, frequencies FROM {table} WHERE height = $1",
            table = self.heights_table
        );
        let Some(row) = sqlx::query(&sql).bind(height).fetch_optional(&mut *conn).await? else {
            return Err(StoreError::Integrity(format!(
                "{}: predecessor {height} resolved to a height with no association row",
                self.kind()
            )));
        };
        let ids: Vec<i64> = row.try_get("ids")?;
        let frequencies: Frequencies = row
            .try_get::<Option<serde_json::Value>, _>("frequencies")?
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let sql = format!(
            "SELECT id, content_hash FROM {table} WHERE id = ANY($1)",
            table = self.records_table
        );
        let rows = sqlx::query(&sql).bind(&ids).fetch_all(&mut *conn).await?;
        if rows.len() != ids.len() {
            return Err(StoreError::Integrity(format!(
                "{}: height {height} references {} ids but {} hashes resolved",
                self.kind(),
                ids.len(),
                rows.len()
            )));
        }

        let mut counts = BTreeMap::new();
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let bytes: Vec<u8> = row.try_get("content_hash")?;
            let hash = ContentHash::try_from_slice(&bytes).ok_or_else(|| {
                StoreError::Integrity(format!("{}: malformed content hash for id {id}", self.kind()))
            })?;
            counts.insert(hash, frequencies.get(&id).copied().unwrap_or(1));
        }
        Ok(counts)
    }

    /// Resolve content hashes to master-table ids.
    ///
    /// Fewer resolved ids than distinct hashes is the fatal dedup
    /// integrity error: some record failed to persist.
    async fn ids_for_hashes(
        &self,
        conn: &mut PgConnection,
        counts: &BTreeMap<ContentHash, u32>,
    ) -> Result<BTreeMap<ContentHash, i64>, StoreError> {
        if counts.is_empty() {
            return Ok(BTreeMap::new());
        }
        let hashes: Vec<Vec<u8>> = counts.keys().map(|h| h.as_bytes().to_vec()).collect();
        let sql = format!(
            "SELECT id, content_hash FROM {table} WHERE content_hash = ANY($1)",
            table = self.records_table
        );
        let rows = sqlx::query(&sql).bind(&hashes).fetch_all(&mut *conn).await?;

        let mut id_by_hash = BTreeMap::new();
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let bytes: Vec<u8> = row.try_get("content_hash")?;
            let hash = ContentHash::try_from_slice(&bytes).ok_or_else(|| {
                StoreError::Integrity(format!("{}: malformed content hash for id {id}", self.kind()))
            })?;
            id_by_hash.insert(hash, id);
        }
        if id_by_hash.len() != counts.len() {
            return Err(StoreError::Integrity(format!(
                "{}: inserted {} distinct hashes but resolved {} ids",
                self.kind(),
                counts.len(),
                id_by_hash.len()
            )));
        }
        Ok(id_by_hash)
    }

    async fn put_identical(
        &self,
        conn: &mut PgConnection,
        height: i64,
        identical_to: i64,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {table} (height, identical_to) VALUES ($1, $2)",
            table = self.identical_table
        );
        sqlx::query(&sql)
            .bind(height)
            .bind(identical_to)
            .execute(conn)
            .await?;
        tracing::debug!(
            kind = self.kind(),
            height,
            identical_to,
            "Stored identical-to link"
        );
        Ok(())
    }

    async fn put_association(
        &self,
        conn: &mut PgConnection,
        height: i64,
        ids: &[i64],
        frequencies: &Frequencies,
    ) -> Result<(), StoreError> {
        let freq_json = if frequencies.is_empty() {
            None
        } else {
            Some(serde_json::to_value(frequencies)?)
        };
        let sql = format!(
            "INSERT INTO {table} (height, ids, frequencies) VALUES ($1, $2, $3)",
            table = self.heights_table
        );
        sqlx::query(&sql)
            .bind(height)
            .bind(ids)
            .bind(freq_json)
            .execute(conn)
            .await?;
        tracing::debug!(
            kind = self.kind(),
            height,
            records = ids.len(),
            "Stored explicit association"
        );
        Ok(())
    }
}
