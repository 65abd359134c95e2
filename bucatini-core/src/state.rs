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

//! Resume-checkpoint storage.
//!
//! The [`ResumeStore`] trait abstracts the single piece of durable state the
//! relay owns: the replication timestamp of the last successfully published
//! entry. Losing it is cheap; the supervisor falls back to the end of the
//! oplog and consumers see at most one catch-up window of duplicates.

use async_trait::async_trait;
use bson::Timestamp;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Packs a replication timestamp into its canonical 64-bit form: the seconds
/// half in the upper 32 bits, the ordinal in the lower 32.
#[must_use]
pub fn pack_timestamp(ts: Timestamp) -> u64 {
    (u64::from(ts.time) << 32) | u64::from(ts.increment)
}

/// Rebuilds a replication timestamp from its packed 64-bit form.
#[must_use]
pub fn unpack_timestamp(raw: u64) -> Timestamp {
    Timestamp {
        time: (raw >> 32) as u32,
        increment: raw as u32,
    }
}

/// The last-published replication timestamp, as persisted by a
/// [`ResumeStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// The checkpointed replication timestamp.
    pub timestamp: Timestamp,
}

impl Checkpoint {
    /// Wall-clock instant the checkpointed entry was produced, read from the
    /// seconds half of the replication timestamp.
    #[must_use]
    pub fn produced_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(i64::from(self.timestamp.time), 0).unwrap_or_default()
    }

    /// True when the checkpoint is older than the allowed catch-up window.
    ///
    /// Stale checkpoints are discarded in favor of "start from the end of
    /// the oplog": replaying further back than the window would flood
    /// consumers with history they no longer care about.
    #[must_use]
    pub fn is_stale(&self, max_catch_up: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.produced_at());
        age > chrono::Duration::from_std(max_catch_up).unwrap_or(chrono::Duration::MAX)
    }
}

/// Errors from reading or writing the resume checkpoint.
#[derive(Debug, Error)]
pub enum ResumeStoreError {
    /// No checkpoint has ever been written under the configured prefix.
    #[error("no resume checkpoint found")]
    Missing,

    /// The sink datastore could not be reached.
    #[error("resume store connection error: {0}")]
    Connection(String),

    /// The persisted value could not be parsed back into a timestamp.
    #[error("malformed resume checkpoint: {0}")]
    Malformed(String),

    /// Anything else.
    #[error("resume store error: {0}")]
    Other(String),
}

/// Persistence contract for the resume checkpoint.
///
/// Writes are best-effort from the pipeline's point of view: a failed save is
/// logged and swallowed by the caller, and publication proceeds.
#[async_trait]
pub trait ResumeStore: Send + Sync {
    /// Reads the persisted checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ResumeStoreError::Missing`] when no checkpoint exists, and
    /// other variants for connectivity or decoding failures.
    async fn load(&self) -> Result<Checkpoint, ResumeStoreError>;

    /// Persists `timestamp` as the new checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error when the value could not be written.
    async fn save(&self, timestamp: Timestamp) -> Result<(), ResumeStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trip() {
        let ts = Timestamp {
            time: 1_700_000_000,
            increment: 42,
        };
        assert_eq!(unpack_timestamp(pack_timestamp(ts)), ts);
        assert_eq!(pack_timestamp(ts), (1_700_000_000_u64 << 32) | 42);
    }

    #[test]
    fn packed_ordering_matches_timestamp_ordering() {
        let earlier = Timestamp {
            time: 10,
            increment: 9,
        };
        let later = Timestamp {
            time: 11,
            increment: 0,
        };
        assert!(earlier < later);
        assert!(pack_timestamp(earlier) < pack_timestamp(later));
    }

    #[test]
    fn staleness_is_measured_from_the_seconds_half() {
        let now = Utc::now();
        let produced = now - chrono::Duration::seconds(120);
        let checkpoint = Checkpoint {
            timestamp: Timestamp {
                time: produced.timestamp() as u32,
                increment: 0,
            },
        };

        assert!(checkpoint.is_stale(Duration::from_secs(60), now));
        assert!(!checkpoint.is_stale(Duration::from_secs(600), now));
    }
}
