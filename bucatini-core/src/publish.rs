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

//! Publication contract and an in-memory test double.

use crate::message::Publication;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Errors raised while publishing a change message.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The sink could not be reached or the write did not complete.
    #[error("publish connection error: {message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// The underlying error, when one exists.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Anything else.
    #[error("publish error: {0}")]
    Other(String),
}

impl PublishError {
    /// Wraps an underlying connection-level error.
    #[must_use]
    pub fn connection(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Connection {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a connection error with a bare message.
    #[must_use]
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }
}

/// Contract for delivering one change message to its two channels.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes the message on both the collection-wide and the per-document
    /// channel.
    ///
    /// A publication counts as delivered only once both channel writes have
    /// succeeded; no transactional guarantee is offered across the two, and
    /// callers recover from partial delivery through their restart path
    /// (consumers tolerate duplicates).
    ///
    /// # Errors
    ///
    /// Returns an error when either channel write failed.
    async fn publish(&self, publication: &Publication) -> Result<(), PublishError>;
}

/// In-memory publisher for tests: records publications and can simulate a
/// number of leading failures.
#[derive(Debug, Default)]
pub struct MockPublisher {
    published: Mutex<Vec<Publication>>,
    failures_remaining: AtomicUsize,
}

impl MockPublisher {
    /// Creates a mock that accepts every publication.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock whose first `failures` publish calls fail.
    #[must_use]
    pub fn with_failures(failures: usize) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            failures_remaining: AtomicUsize::new(failures),
        }
    }

    /// Returns every publication accepted so far.
    #[must_use]
    pub fn published(&self) -> Vec<Publication> {
        self.published
            .lock()
            .map(|published| published.clone())
            .unwrap_or_default()
    }

    /// Number of publications accepted so far.
    #[must_use]
    pub fn publish_count(&self) -> usize {
        self.published
            .lock()
            .map(|published| published.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, publication: &Publication) -> Result<(), PublishError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(PublishError::connection_msg("simulated publish failure"));
        }

        if let Ok(mut published) = self.published.lock() {
            published.push(publication.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::Timestamp;

    fn publication() -> Publication {
        Publication {
            collection_channel: "foo.bar".to_string(),
            specific_channel: "foo.bar::someid".to_string(),
            msg: r#"{"e":"i","d":{"_id":"someid"},"f":[]}"#.to_string(),
            timestamp: Timestamp {
                time: 1,
                increment: 0,
            },
        }
    }

    #[tokio::test]
    async fn mock_records_publications() {
        let publisher = MockPublisher::new();
        publisher.publish(&publication()).await.unwrap();
        publisher.publish(&publication()).await.unwrap();

        assert_eq!(publisher.publish_count(), 2);
        assert_eq!(publisher.published()[0].collection_channel, "foo.bar");
    }

    #[tokio::test]
    async fn mock_fails_the_configured_number_of_times() {
        let publisher = MockPublisher::with_failures(1);

        assert!(publisher.publish(&publication()).await.is_err());
        assert!(publisher.publish(&publication()).await.is_ok());
        assert_eq!(publisher.publish_count(), 1);
    }
}
