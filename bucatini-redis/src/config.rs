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

//! Connection configuration shared by the Redis store and publisher.

use deadpool_redis::{Config as DeadpoolConfig, Pool, PoolConfig, Runtime};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

/// Default connection pool size.
const DEFAULT_POOL_SIZE: usize = 10;

/// Default per-operation retry budget for transient failures.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default connection timeout.
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default key namespace.
const DEFAULT_KEY_PREFIX: &str = "bucatini";

/// Errors raised while building or applying a [`RedisConfig`].
#[derive(Debug, Error)]
pub enum RedisConfigError {
    /// No connection URL was provided.
    #[error("redis url is required")]
    MissingUrl,

    /// The pool needs at least one connection.
    #[error("pool_size must be greater than 0")]
    ZeroPoolSize,

    /// The connection pool could not be created.
    #[error("failed to create redis connection pool: {0}")]
    Pool(String),

    /// The initial connectivity check failed.
    #[error("redis connection test failed: {0}")]
    Connection(String),
}

/// Configuration for the Redis-backed store and publisher.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g. `redis://localhost:6379`).
    pub url: String,

    /// Namespace prefixed to every key the relay owns.
    pub key_prefix: String,

    /// Connection pool size.
    pub pool_size: usize,

    /// Timeout for creating and waiting on pooled connections.
    pub connection_timeout: Duration,

    /// Per-operation retry budget for transient failures.
    pub max_retries: u32,
}

impl RedisConfig {
    /// Creates a new builder for `RedisConfig`.
    #[must_use]
    pub fn builder() -> RedisConfigBuilder {
        RedisConfigBuilder::default()
    }

    /// Creates the connection pool and verifies connectivity with a PING.
    ///
    /// # Errors
    ///
    /// Returns [`RedisConfigError::Pool`] when pool creation fails and
    /// [`RedisConfigError::Connection`] when the server cannot be reached.
    pub async fn connect(&self) -> Result<Pool, RedisConfigError> {
        let mut pool_config = DeadpoolConfig::from_url(&self.url);
        let pool_settings = pool_config.pool.get_or_insert_with(PoolConfig::default);
        pool_settings.max_size = self.pool_size;
        pool_settings.timeouts.wait = Some(self.connection_timeout);
        pool_settings.timeouts.create = Some(self.connection_timeout);
        pool_settings.timeouts.recycle = Some(self.connection_timeout);

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| {
                error!(error = %e, "failed to create redis connection pool");
                RedisConfigError::Pool(e.to_string())
            })?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| RedisConfigError::Connection(e.to_string()))?;
        redis::cmd("PING")
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| RedisConfigError::Connection(e.to_string()))?;

        debug!(url = %self.url, "redis connection pool initialized");
        Ok(pool)
    }
}

/// Builder for [`RedisConfig`] with validation.
#[derive(Debug, Default)]
pub struct RedisConfigBuilder {
    url: Option<String>,
    key_prefix: Option<String>,
    pool_size: Option<usize>,
    connection_timeout: Option<Duration>,
    max_retries: Option<u32>,
}

impl RedisConfigBuilder {
    /// Sets the Redis connection URL.
    ///
    /// Accepts the usual forms: `redis://host:port`,
    /// `redis://:password@host:port`, `redis://host:port/0`, `rediss://...`.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the key namespace.
    ///
    /// Default: `bucatini`
    #[must_use]
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Sets the connection pool size.
    ///
    /// Default: 10
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Sets the connection timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Sets the per-operation retry budget for transient failures.
    ///
    /// Default: 3
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Builds the `RedisConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is missing or the pool size is zero.
    pub fn build(self) -> Result<RedisConfig, RedisConfigError> {
        let url = self.url.ok_or(RedisConfigError::MissingUrl)?;

        let pool_size = self.pool_size.unwrap_or(DEFAULT_POOL_SIZE);
        if pool_size == 0 {
            return Err(RedisConfigError::ZeroPoolSize);
        }

        Ok(RedisConfig {
            url,
            key_prefix: self
                .key_prefix
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            pool_size,
            connection_timeout: self
                .connection_timeout
                .unwrap_or(DEFAULT_CONNECTION_TIMEOUT),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = RedisConfig::builder()
            .url("redis://localhost:6379")
            .build()
            .unwrap();

        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.key_prefix, "bucatini");
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn builder_overrides() {
        let config = RedisConfig::builder()
            .url("redis://localhost:6379")
            .key_prefix("myapp")
            .pool_size(20)
            .connection_timeout(Duration::from_secs(1))
            .max_retries(5)
            .build()
            .unwrap();

        assert_eq!(config.key_prefix, "myapp");
        assert_eq!(config.pool_size, 20);
        assert_eq!(config.connection_timeout, Duration::from_secs(1));
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn builder_requires_url() {
        assert!(matches!(
            RedisConfig::builder().build(),
            Err(RedisConfigError::MissingUrl)
        ));
    }

    #[test]
    fn builder_rejects_zero_pool_size() {
        assert!(matches!(
            RedisConfig::builder()
                .url("redis://localhost:6379")
                .pool_size(0)
                .build(),
            Err(RedisConfigError::ZeroPoolSize)
        ));
    }
}
