//! The legacy sequential key-value poll log, read during one-shot migration.
//!
//! Before the delta schema existed, polls were appended to a
//! Redis-compatible key-value log, one JSON blob per height under
//! `poll:{height}`. Migration reads that log through the
//! [`LegacyPollSource`] trait so the old storage model never leaks into
//! the archive; [`KvPollSource`] is the production implementation.

use chrono::{DateTime, Utc};
use fred::prelude::*;
use serde::{Deserialize, Serialize};

use quorum_types::{Bucket, Height, Registration};

use crate::error::StoreError;

/// One height's poll as serialized in the legacy log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyPoll {
    /// Mint time of the checkpoint.
    pub mint_time: DateTime<Utc>,
    /// Full registration set at the height.
    pub registrations: Vec<Registration>,
    /// Full bucket sets at the height, one list per universe, in the same
    /// order the archive's bucket stores are configured.
    pub buckets: Vec<Vec<Bucket>>,
}

impl LegacyPoll {
    /// Decode a legacy blob.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Integrity`] if the blob is malformed: legacy
    /// data is trusted input and a parse failure means corruption, not a
    /// transient condition.
    pub fn from_bytes(height: Height, bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| {
            StoreError::Integrity(format!("malformed legacy poll at height {height}: {e}"))
        })
    }

    /// Encode to the legacy blob format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A read-only view of the legacy poll log, keyed by height.
pub trait LegacyPollSource: Send + Sync {
    /// The raw blob stored for `height`, or `None` past the end of the log.
    fn poll_bytes(
        &self,
        height: Height,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send;
}

/// Key under which a height's legacy poll blob is stored.
fn poll_key(height: Height) -> String {
    format!("poll:{height}")
}

/// [`LegacyPollSource`] over a Redis-compatible key-value store.
#[derive(Clone)]
pub struct KvPollSource {
    client: Client,
}

impl KvPollSource {
    /// Connect to the legacy store at the given URL.
    ///
    /// The URL follows the Redis URL scheme: `redis://host:port` or
    /// `redis://host:port/db`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed and
    /// [`StoreError::Legacy`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let config = Config::from_url(url)
            .map_err(|e| StoreError::Config(format!("invalid legacy store URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to legacy poll log");
        Ok(Self { client })
    }
}

impl LegacyPollSource for KvPollSource {
    async fn poll_bytes(&self, height: Height) -> Result<Option<Vec<u8>>, StoreError> {
        let bytes: Option<Vec<u8>> = self.client.get(poll_key(height)).await?;
        Ok(bytes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    use super::*;

    #[test]
    fn poll_key_format() {
        assert_eq!(poll_key(1_024), "poll:1024");
    }

    #[test]
    fn legacy_blob_round_trip() {
        let poll = LegacyPoll {
            mint_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            registrations: vec![Registration {
                name: "alpha".to_owned(),
                address: "addr-a".to_owned(),
                operator_address: "op-a".to_owned(),
                reward_address: "rw-a".to_owned(),
                self_stake_weight: 1,
            }],
            buckets: vec![
                vec![Bucket {
                    start_time: Utc.timestamp_opt(1_699_000_000, 0).unwrap(),
                    duration_secs: 86_400,
                    amount: Decimal::new(500, 0),
                    decay: false,
                    voter: "voter-1".to_owned(),
                    candidate: "alpha".to_owned(),
                }],
                vec![],
            ],
        };
        let bytes = poll.to_bytes().unwrap();
        let restored = LegacyPoll::from_bytes(24, &bytes).unwrap();
        assert_eq!(poll, restored);
    }

    #[test]
    fn malformed_blob_is_an_integrity_error() {
        let err = LegacyPoll::from_bytes(24, b"not json").unwrap_err();
        assert!(matches!(err, StoreError::Integrity(_)));
    }
}
