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

//! Retry policy for transient Redis failures, shared by store and publisher.

use redis::RedisError;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Base delay for exponential backoff between retries.
const BASE_RETRY_DELAY_MS: u64 = 100;

/// Runs `operation`, retrying transient failures with exponential backoff.
pub(crate) async fn with_retry<F, T, Fut>(max_retries: u32, operation: F) -> Result<T, RedisError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, RedisError>>,
{
    let mut retries = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if is_retryable(&e) && retries < max_retries => {
                retries += 1;
                let delay = Duration::from_millis(BASE_RETRY_DELAY_MS * 2_u64.pow(retries - 1));
                warn!(
                    attempt = retries,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "redis operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(retries, error = %e, "redis operation failed");
                return Err(e);
            }
        }
    }
}

fn is_retryable(error: &RedisError) -> bool {
    matches!(
        error.kind(),
        redis::ErrorKind::IoError | redis::ErrorKind::ResponseError
    )
}

/// Maps a pool checkout failure into a retryable `RedisError`.
pub(crate) fn pool_error(e: impl std::fmt::Display) -> RedisError {
    RedisError::from((
        redis::ErrorKind::IoError,
        "failed to get connection from pool",
        e.to_string(),
    ))
}
