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

//! Supervision of the reader-to-publisher stream.
//!
//! The [`Pipeline`] wires the oplog tailer to a [`Publisher`] through a
//! bounded channel and keeps the stream alive across failures:
//!
//! - **Resume**: pick the start timestamp from the resume checkpoint, the end
//!   of the oplog, or the wall clock, in that order
//! - **Back-pressure**: a bounded channel between reader and publisher slows
//!   the cursor down when the sink is slow
//! - **Isolation**: a malformed entry is skipped, never stalls the stream
//! - **Recovery**: stream failures restart the reader after a short delay,
//!   resuming from the last written checkpoint (at-least-once delivery)
//! - **Graceful stop**: the stop flag drains the in-flight entry, then exits
//!
//! # Example
//!
//! ```rust,no_run
//! use bucatini_core::pipeline::{Pipeline, PipelineConfig};
//! use bucatini_core::publish::MockPublisher;
//! # use bucatini_core::state::{Checkpoint, ResumeStore, ResumeStoreError};
//! # struct NullStore;
//! # #[async_trait::async_trait]
//! # impl ResumeStore for NullStore {
//! #     async fn load(&self) -> Result<Checkpoint, ResumeStoreError> {
//! #         Err(ResumeStoreError::Missing)
//! #     }
//! #     async fn save(&self, _: bson::Timestamp) -> Result<(), ResumeStoreError> {
//! #         Ok(())
//! #     }
//! # }
//! use tokio::sync::watch;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = mongodb::Client::with_uri_str("mongodb://localhost:27017").await?;
//! let config = PipelineConfig::builder().build()?;
//! let pipeline = Pipeline::new(client, NullStore, MockPublisher::new(), config);
//!
//! let (stop_tx, stop_rx) = watch::channel(false);
//! tokio::spawn(async move {
//!     // ... on SIGTERM ...
//!     let _ = stop_tx.send(true);
//! });
//!
//! pipeline.run(stop_rx).await;
//! # Ok(())
//! # }
//! ```

use crate::entry::{OplogEntry, RawOplogEntry};
use crate::message::Publication;
use crate::metrics;
use crate::publish::{PublishError, Publisher};
use crate::state::{ResumeStore, ResumeStoreError};
use crate::tail::{OplogTailer, TailError};
use bson::Timestamp;
use chrono::Utc;
use mongodb::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the pipeline supervisor.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Checkpoints older than this are discarded in favor of starting from
    /// the end of the oplog.
    pub max_catch_up: Duration,

    /// Poll window of the tailable cursor.
    pub poll_interval: Duration,

    /// Delay before restarting the stream after a failure.
    pub retry_delay: Duration,

    /// Capacity of the reader-to-publisher channel.
    pub channel_capacity: usize,
}

impl PipelineConfig {
    /// Creates a new builder for `PipelineConfig`.
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    max_catch_up: Option<Duration>,
    poll_interval: Option<Duration>,
    retry_delay: Option<Duration>,
    channel_capacity: Option<usize>,
}

impl PipelineConfigBuilder {
    /// Sets the catch-up window for resume checkpoints.
    ///
    /// Default: 60 seconds
    #[must_use]
    pub fn max_catch_up(mut self, max_catch_up: Duration) -> Self {
        self.max_catch_up = Some(max_catch_up);
        self
    }

    /// Sets the cursor poll window.
    ///
    /// Default: 1 second
    #[must_use]
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }

    /// Sets the restart delay after a stream failure.
    ///
    /// Default: 1 second
    #[must_use]
    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    /// Sets the reader-to-publisher channel capacity.
    ///
    /// Default: 16
    #[must_use]
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    /// Builds the `PipelineConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error when a provided value is out of range.
    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        let poll_interval = self.poll_interval.unwrap_or(Duration::from_secs(1));
        if poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }

        let channel_capacity = self.channel_capacity.unwrap_or(16);
        if channel_capacity == 0 {
            return Err(ConfigError::ZeroChannelCapacity);
        }

        Ok(PipelineConfig {
            max_catch_up: self.max_catch_up.unwrap_or(Duration::from_secs(60)),
            poll_interval,
            retry_delay: self.retry_delay.unwrap_or(Duration::from_secs(1)),
            channel_capacity,
        })
    }
}

/// Pipeline configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The cursor poll window must be non-zero.
    #[error("poll_interval must be greater than zero")]
    ZeroPollInterval,

    /// The reader-to-publisher channel needs at least one slot.
    #[error("channel_capacity must be at least 1")]
    ZeroChannelCapacity,
}

/// Errors terminating one run of the stream.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The oplog reader failed.
    #[error("oplog tailing failed")]
    Tail(#[from] TailError),

    /// The publisher failed.
    #[error("publishing failed")]
    Publish(#[from] PublishError),

    /// The reader task panicked.
    #[error("oplog reader task panicked")]
    ReaderPanic,
}

/// Drives one raw entry through classification, summarization, publication,
/// and the best-effort checkpoint advance.
pub struct Dispatcher<S, P> {
    store: Arc<S>,
    publisher: Arc<P>,
    last_checkpoint: Option<Timestamp>,
}

impl<S: ResumeStore, P: Publisher> Dispatcher<S, P> {
    /// Creates a dispatcher over the given store and publisher.
    #[must_use]
    pub fn new(store: Arc<S>, publisher: Arc<P>) -> Self {
        Self {
            store,
            publisher,
            last_checkpoint: None,
        }
    }

    /// Handles one raw oplog entry end to end.
    ///
    /// Entries that are filtered out or carry an unusable document id are
    /// counted and skipped, returning `Ok(None)`. Only publish failures
    /// propagate: they mean the stream can no longer make progress and the
    /// supervisor must restart from the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns the publish error when either channel write failed.
    pub async fn dispatch(
        &mut self,
        raw: RawOplogEntry,
    ) -> Result<Option<Publication>, PublishError> {
        metrics::increment_entries_received();

        let entry = match OplogEntry::from_raw(raw) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                metrics::increment_entries_skipped("filtered");
                return Ok(None);
            }
            Err(error) => {
                warn!(%error, "skipping oplog entry with unusable document id");
                metrics::increment_entries_skipped("bad_id");
                return Ok(None);
            }
        };

        let publication = match Publication::from_entry(&entry) {
            Ok(publication) => publication,
            Err(error) => {
                warn!(%error, namespace = %entry.namespace, "skipping unserializable change message");
                metrics::increment_entries_skipped("serialize");
                return Ok(None);
            }
        };

        debug!(
            collection_channel = %publication.collection_channel,
            specific_channel = %publication.specific_channel,
            "publishing change message"
        );
        let started = Instant::now();
        self.publisher.publish(&publication).await?;
        metrics::record_publish_duration(started.elapsed().as_secs_f64());
        metrics::increment_publications(&publication.collection_channel);

        self.advance_checkpoint(publication.timestamp).await;
        Ok(Some(publication))
    }

    /// Best-effort checkpoint write. Never regresses past a previously
    /// written timestamp and never fails the publication.
    async fn advance_checkpoint(&mut self, timestamp: Timestamp) {
        if self.last_checkpoint.is_some_and(|last| timestamp < last) {
            return;
        }
        match self.store.save(timestamp).await {
            Ok(()) => self.last_checkpoint = Some(timestamp),
            Err(error) => {
                warn!(%error, "failed to persist resume checkpoint");
                metrics::increment_checkpoint_failures();
            }
        }
    }
}

/// Chooses the replication timestamp tailing should start from.
///
/// Preference order: a resume checkpoint fresh within `max_catch_up`, then
/// the end of the oplog, then the current wall clock. The latest-entry lookup
/// is injected so the policy can be exercised without a live replica set.
pub async fn resolve_start_timestamp<S, F, Fut>(
    store: &S,
    max_catch_up: Duration,
    latest_timestamp: F,
) -> Timestamp
where
    S: ResumeStore,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Timestamp, TailError>>,
{
    match store.load().await {
        Ok(checkpoint) if !checkpoint.is_stale(max_catch_up, Utc::now()) => {
            info!(timestamp = ?checkpoint.timestamp, "resuming from persisted checkpoint");
            return checkpoint.timestamp;
        }
        Ok(checkpoint) => {
            warn!(
                produced_at = %checkpoint.produced_at(),
                "resume checkpoint is older than the catch-up window, starting from end of oplog"
            );
        }
        Err(ResumeStoreError::Missing) => {
            info!("no resume checkpoint found, starting from end of oplog");
        }
        Err(error) => {
            error!(%error, "failed to load resume checkpoint, starting from end of oplog");
        }
    }

    match latest_timestamp().await {
        Ok(timestamp) => {
            info!(?timestamp, "starting from end of oplog");
            timestamp
        }
        Err(error) => {
            error!(%error, "failed to read end of oplog, starting from current wall clock");
            wall_clock_timestamp()
        }
    }
}

fn wall_clock_timestamp() -> Timestamp {
    Timestamp {
        time: Utc::now().timestamp().max(0) as u32,
        increment: 0,
    }
}

/// Supervises the oplog reader and the publisher under a stop flag.
pub struct Pipeline<S, P> {
    client: Client,
    store: Arc<S>,
    publisher: Arc<P>,
    config: PipelineConfig,
}

impl<S, P> Pipeline<S, P>
where
    S: ResumeStore + 'static,
    P: Publisher + 'static,
{
    /// Creates a pipeline over an already-connected MongoDB client.
    #[must_use]
    pub fn new(client: Client, store: S, publisher: P, config: PipelineConfig) -> Self {
        Self {
            client,
            store: Arc::new(store),
            publisher: Arc::new(publisher),
            config,
        }
    }

    /// Runs the pipeline until the stop flag flips.
    ///
    /// Recoverable stream failures restart the reader after the configured
    /// retry delay, resuming from the last written checkpoint. Entries whose
    /// checkpoint write was lost are republished: delivery is at-least-once
    /// and consumers deduplicate on the publication timestamp.
    #[instrument(skip_all)]
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        metrics::set_pipeline_status(metrics::PipelineStatus::Running);

        loop {
            if *stop.borrow() {
                break;
            }

            info!("starting oplog tailing");
            match self.run_once(stop.clone()).await {
                Ok(()) => {
                    if *stop.borrow() {
                        break;
                    }
                    warn!("oplog stream ended prematurely, restarting");
                }
                Err(error) => {
                    error!(%error, "oplog stream failed, restarting");
                }
            }
            if *stop.borrow() {
                break;
            }

            metrics::increment_reconnects();
            metrics::set_pipeline_status(metrics::PipelineStatus::Reconnecting);
            tokio::select! {
                _ = stop.changed() => {}
                () = tokio::time::sleep(self.config.retry_delay) => {}
            }
            metrics::set_pipeline_status(metrics::PipelineStatus::Running);
        }

        info!("pipeline stopped");
        metrics::set_pipeline_status(metrics::PipelineStatus::Stopped);
    }

    /// One run of the stream: resolve the start position, spawn the reader,
    /// and publish until the stream ends or the stop flag flips.
    async fn run_once(&self, mut stop: watch::Receiver<bool>) -> Result<(), PipelineError> {
        let tailer = OplogTailer::new(&self.client, self.config.poll_interval);
        let start = resolve_start_timestamp(
            self.store.as_ref(),
            self.config.max_catch_up,
            || async { tailer.latest_timestamp().await },
        )
        .await;

        let (tx, mut rx) = mpsc::channel(self.config.channel_capacity);
        let reader_tailer = tailer.clone();
        let reader_stop = stop.clone();
        let reader =
            tokio::spawn(async move { reader_tailer.run(start, tx, reader_stop).await });

        let mut dispatcher = Dispatcher::new(Arc::clone(&self.store), Arc::clone(&self.publisher));

        let consume_result = loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        info!("stop requested, draining pipeline");
                        break Ok(());
                    }
                }
                entry = rx.recv() => match entry {
                    Some(raw) => {
                        if let Err(error) = dispatcher.dispatch(raw).await {
                            break Err(PipelineError::Publish(error));
                        }
                    }
                    // Reader ended; its result below tells us why.
                    None => break Ok(()),
                },
            }
        };

        // Dropping the receiver unblocks a reader stuck on a full channel;
        // on the drain path it also observes the same stop flag.
        drop(rx);
        let reader_result = match reader.await {
            Ok(result) => result,
            Err(join_error) => {
                error!(%join_error, "oplog reader task panicked");
                return consume_result.and(Err(PipelineError::ReaderPanic));
            }
        };

        match consume_result {
            Err(error) => Err(error),
            Ok(()) => reader_result.map_err(PipelineError::Tail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = PipelineConfig::builder().build().unwrap();
        assert_eq!(config.max_catch_up, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.channel_capacity, 16);
    }

    #[test]
    fn config_builder_overrides() {
        let config = PipelineConfig::builder()
            .max_catch_up(Duration::from_secs(300))
            .poll_interval(Duration::from_millis(500))
            .retry_delay(Duration::from_secs(2))
            .channel_capacity(4)
            .build()
            .unwrap();

        assert_eq!(config.max_catch_up, Duration::from_secs(300));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.channel_capacity, 4);
    }

    #[test]
    fn config_rejects_zero_poll_interval() {
        let result = PipelineConfig::builder()
            .poll_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(ConfigError::ZeroPollInterval)));
    }

    #[test]
    fn config_rejects_zero_channel_capacity() {
        let result = PipelineConfig::builder().channel_capacity(0).build();
        assert!(matches!(result, Err(ConfigError::ZeroChannelCapacity)));
    }

    #[test]
    fn wall_clock_fallback_has_zero_increment() {
        let ts = wall_clock_timestamp();
        assert_eq!(ts.increment, 0);
        assert!(ts.time > 0);
    }
}
