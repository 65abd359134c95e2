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

//! Metrics instrumentation for the relay pipeline.
//!
//! Uses the `metrics` crate facade, so any exporter (Prometheus, StatsD, ...)
//! can be installed by the embedding process. Names follow Prometheus
//! conventions (`bucatini_` prefix, `_total` counters, unit suffixes) and
//! labels stay low-cardinality: skip reasons and collection namespaces only,
//! never document ids or timestamps.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Oplog entries received from the tailer, before any filtering.
const ENTRIES_RECEIVED_TOTAL: &str = "bucatini_entries_received_total";

/// Entries dropped before publication, labeled with the reason.
const ENTRIES_SKIPPED_TOTAL: &str = "bucatini_entries_skipped_total";

/// Change messages delivered to both channels, labeled with the namespace.
const PUBLICATIONS_TOTAL: &str = "bucatini_publications_total";

/// Wall time of one publish call, in seconds.
const PUBLISH_DURATION_SECONDS: &str = "bucatini_publish_duration_seconds";

/// Resume-checkpoint writes that failed and were swallowed.
const CHECKPOINT_FAILURES_TOTAL: &str = "bucatini_checkpoint_failures_total";

/// Stream restarts after a reader or publisher failure.
const RECONNECTS_TOTAL: &str = "bucatini_reconnects_total";

/// Current pipeline status (0=stopped, 1=running, 2=reconnecting).
const PIPELINE_STATUS: &str = "bucatini_pipeline_status";

/// Pipeline lifecycle states as exported on the status gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    /// The pipeline has exited.
    Stopped,
    /// The pipeline is streaming entries.
    Running,
    /// The pipeline is waiting out the restart delay.
    Reconnecting,
}

impl PipelineStatus {
    const fn as_value(self) -> f64 {
        match self {
            Self::Stopped => 0.0,
            Self::Running => 1.0,
            Self::Reconnecting => 2.0,
        }
    }
}

/// Registers metric descriptions for exporters.
///
/// Call once at startup, before the pipeline records anything.
pub fn init_metrics() {
    describe_counter!(
        ENTRIES_RECEIVED_TOTAL,
        "Total number of oplog entries received from the tailer"
    );
    describe_counter!(
        ENTRIES_SKIPPED_TOTAL,
        "Total number of oplog entries dropped before publication"
    );
    describe_counter!(
        PUBLICATIONS_TOTAL,
        "Total number of change messages published to both channels"
    );
    describe_counter!(
        CHECKPOINT_FAILURES_TOTAL,
        "Total number of resume-checkpoint writes that failed"
    );
    describe_counter!(
        RECONNECTS_TOTAL,
        "Total number of stream restarts after a failure"
    );

    describe_histogram!(
        PUBLISH_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Wall time of one publish call"
    );

    describe_gauge!(
        PIPELINE_STATUS,
        "Current pipeline status: 0=stopped, 1=running, 2=reconnecting"
    );
}

/// Counts one entry handed over by the tailer.
pub fn increment_entries_received() {
    counter!(ENTRIES_RECEIVED_TOTAL).increment(1);
}

/// Counts one dropped entry. `reason` is one of a small fixed set
/// (`filtered`, `bad_id`, `serialize`).
pub fn increment_entries_skipped(reason: &str) {
    counter!(ENTRIES_SKIPPED_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Counts one successful publication for the given namespace.
pub fn increment_publications(collection: &str) {
    counter!(PUBLICATIONS_TOTAL, "collection" => collection.to_string()).increment(1);
}

/// Records the wall time of one publish call.
pub fn record_publish_duration(seconds: f64) {
    histogram!(PUBLISH_DURATION_SECONDS).record(seconds);
}

/// Counts one swallowed checkpoint-write failure.
pub fn increment_checkpoint_failures() {
    counter!(CHECKPOINT_FAILURES_TOTAL).increment(1);
}

/// Counts one stream restart.
pub fn increment_reconnects() {
    counter!(RECONNECTS_TOTAL).increment(1);
}

/// Updates the pipeline status gauge.
pub fn set_pipeline_status(status: PipelineStatus) {
    gauge!(PIPELINE_STATUS).set(status.as_value());
}
