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

//! Redis pub/sub publisher.

use crate::config::RedisConfig;
use crate::retry::{pool_error, with_retry};
use async_trait::async_trait;
use bucatini_core::message::Publication;
use bucatini_core::publish::{PublishError, Publisher};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use tracing::trace;

/// Publisher delivering each change message to its two channels.
///
/// The collection-wide channel is written first, then the per-document
/// channel. The writes are independent and carry no transactional guarantee;
/// a retried pair may re-deliver on the first channel, which consumers
/// already tolerate under at-least-once semantics.
#[derive(Clone)]
pub struct RedisPublisher {
    pool: Pool,
    max_retries: u32,
}

impl RedisPublisher {
    /// Creates a publisher over an already-connected pool.
    #[must_use]
    pub fn new(pool: Pool, config: &RedisConfig) -> Self {
        Self {
            pool,
            max_retries: config.max_retries,
        }
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, publication: &Publication) -> Result<(), PublishError> {
        with_retry(self.max_retries, || async {
            let mut conn = self.pool.get().await.map_err(pool_error)?;
            let _: i64 = conn
                .publish(&publication.collection_channel, &publication.msg)
                .await?;
            let _: i64 = conn
                .publish(&publication.specific_channel, &publication.msg)
                .await?;
            Ok(())
        })
        .await
        .map_err(PublishError::connection)?;

        trace!(
            collection_channel = %publication.collection_channel,
            specific_channel = %publication.specific_channel,
            "change message published"
        );
        Ok(())
    }
}
