// Copyright 2025 Bucatini Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Redis-backed resume store.
//!
//! The checkpoint lives in a single key, `<prefix>:last-processed`, holding
//! the packed 64-bit replication timestamp as a decimal string. That keeps
//! the value legible from `redis-cli` and trivially comparable.

use crate::config::RedisConfig;
use crate::retry::{pool_error, with_retry};
use async_trait::async_trait;
use bson::Timestamp;
use bucatini_core::state::{
    pack_timestamp, unpack_timestamp, Checkpoint, ResumeStore, ResumeStoreError,
};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use tracing::debug;

/// Key suffix under which the packed last-processed timestamp is stored.
const CHECKPOINT_KEY: &str = "last-processed";

/// Resume store persisting the checkpoint in a single Redis key.
#[derive(Clone)]
pub struct RedisResumeStore {
    pool: Pool,
    key: String,
    max_retries: u32,
}

impl RedisResumeStore {
    /// Creates a store over an already-connected pool.
    #[must_use]
    pub fn new(pool: Pool, config: &RedisConfig) -> Self {
        Self {
            pool,
            key: format!("{}:{}", config.key_prefix, CHECKPOINT_KEY),
            max_retries: config.max_retries,
        }
    }

    /// The full Redis key this store reads and writes.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    fn decode(raw: &str) -> Result<Checkpoint, ResumeStoreError> {
        raw.parse::<u64>()
            .map(|packed| Checkpoint {
                timestamp: unpack_timestamp(packed),
            })
            .map_err(|e| ResumeStoreError::Malformed(format!("{raw:?}: {e}")))
    }
}

#[async_trait]
impl ResumeStore for RedisResumeStore {
    async fn load(&self) -> Result<Checkpoint, ResumeStoreError> {
        let raw: Option<String> = with_retry(self.max_retries, || async {
            let mut conn = self.pool.get().await.map_err(pool_error)?;
            conn.get(&self.key).await
        })
        .await
        .map_err(|e| ResumeStoreError::Connection(e.to_string()))?;

        match raw {
            Some(value) => Self::decode(&value),
            None => Err(ResumeStoreError::Missing),
        }
    }

    async fn save(&self, timestamp: Timestamp) -> Result<(), ResumeStoreError> {
        let value = pack_timestamp(timestamp).to_string();

        with_retry(self.max_retries, || async {
            let mut conn = self.pool.get().await.map_err(pool_error)?;
            conn.set::<_, _, ()>(&self.key, &value).await
        })
        .await
        .map_err(|e| ResumeStoreError::Connection(e.to_string()))?;

        debug!(key = %self.key, %value, "resume checkpoint persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_round_trips_packed_timestamps() {
        let ts = Timestamp {
            time: 1_700_000_000,
            increment: 3,
        };
        let encoded = pack_timestamp(ts).to_string();
        let checkpoint = RedisResumeStore::decode(&encoded).unwrap();
        assert_eq!(checkpoint.timestamp, ts);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            RedisResumeStore::decode("not-a-number"),
            Err(ResumeStoreError::Malformed(_))
        ));
        assert!(matches!(
            RedisResumeStore::decode("-4"),
            Err(ResumeStoreError::Malformed(_))
        ));
    }
}
