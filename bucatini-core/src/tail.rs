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

//! Oplog tailing against the replica-set primary.
//!
//! The tailer holds a tailable await-cursor on `local.oplog.rs`, filtered to
//! `ts > start` and sorted in natural order, so entries arrive in replication
//! commit order. Quiet poll windows are expected control flow: the cursor
//! blocks server-side for up to the poll interval and is then re-polled. A
//! cursor that dies without an error (the capped collection wrapped past it)
//! is reopened from the last yielded timestamp; a cursor error is reported
//! upward so the supervisor can restart the tailer with backoff.

use crate::entry::RawOplogEntry;
use bson::{doc, Timestamp};
use futures::TryStreamExt;
use mongodb::options::{CursorType, FindOneOptions, FindOptions};
use mongodb::{Client, Collection, Cursor};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Database holding the replica-set oplog.
const OPLOG_DATABASE: &str = "local";

/// The oplog collection itself.
const OPLOG_COLLECTION: &str = "oplog.rs";

/// Errors raised while tailing the oplog.
#[derive(Debug, Error)]
pub enum TailError {
    /// The cursor failed: network fault, loss of primary, and similar.
    #[error("oplog cursor error")]
    Cursor(#[from] mongodb::error::Error),

    /// The oplog contains no entries at all.
    #[error("the oplog is empty")]
    EmptyOplog,
}

/// Streams raw oplog entries newer than a start timestamp, in natural order.
///
/// MongoDB 4.4+ applies its optimized oplog scan to `ts`-bounded natural-order
/// queries automatically, which replaces the legacy oplog-replay cursor hint.
#[derive(Debug, Clone)]
pub struct OplogTailer {
    collection: Collection<RawOplogEntry>,
    poll_interval: Duration,
}

impl OplogTailer {
    /// Creates a tailer over the given client's replica-set oplog.
    #[must_use]
    pub fn new(client: &Client, poll_interval: Duration) -> Self {
        Self {
            collection: client.database(OPLOG_DATABASE).collection(OPLOG_COLLECTION),
            poll_interval,
        }
    }

    /// Timestamp of the newest entry currently in the oplog.
    ///
    /// # Errors
    ///
    /// Returns [`TailError::EmptyOplog`] when the oplog holds no entries and
    /// [`TailError::Cursor`] on query failure.
    pub async fn latest_timestamp(&self) -> Result<Timestamp, TailError> {
        let options = FindOneOptions::builder()
            .sort(doc! { "$natural": -1 })
            .build();
        self.collection
            .find_one(doc! {})
            .with_options(options)
            .await?
            .map(|entry| entry.timestamp)
            .ok_or(TailError::EmptyOplog)
    }

    async fn open_cursor(&self, after: Timestamp) -> Result<Cursor<RawOplogEntry>, TailError> {
        let options = FindOptions::builder()
            .cursor_type(CursorType::TailableAwait)
            .max_await_time(self.poll_interval)
            .sort(doc! { "$natural": 1 })
            .build();
        Ok(self
            .collection
            .find(doc! { "ts": { "$gt": after } })
            .with_options(options)
            .await?)
    }

    /// Tails the oplog from `start`, sending raw entries into `out`.
    ///
    /// Returns `Ok(())` once the stop flag flips or the receiving side goes
    /// away; the send into the bounded channel is what slows the cursor down
    /// when the publisher cannot keep up.
    ///
    /// # Errors
    ///
    /// Returns [`TailError::Cursor`] when the cursor fails in a way that
    /// requires a fresh start (the caller restarts from the checkpoint).
    pub async fn run(
        &self,
        start: Timestamp,
        out: mpsc::Sender<RawOplogEntry>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), TailError> {
        if *stop.borrow() {
            return Ok(());
        }

        let mut last_seen = start;
        let mut cursor = self.open_cursor(last_seen).await?;
        info!(start = ?start, "oplog tailing started");

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!("stop requested, closing oplog cursor");
                        return Ok(());
                    }
                }
                next = cursor.try_next() => match next {
                    Ok(Some(entry)) => {
                        last_seen = entry.timestamp;
                        if out.send(entry).await.is_err() {
                            return Ok(());
                        }
                    }
                    Ok(None) => {
                        warn!(last_seen = ?last_seen, "oplog cursor expired, reopening");
                        cursor = self.open_cursor(last_seen).await?;
                    }
                    Err(error) => {
                        warn!(%error, "oplog cursor failed");
                        return Err(TailError::Cursor(error));
                    }
                },
            }
        }
    }
}
