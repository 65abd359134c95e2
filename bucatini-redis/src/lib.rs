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

//! Redis backends for the Bucatini relay.
//!
//! This crate implements both Redis-facing halves of the pipeline: the
//! [`ResumeStore`](bucatini_core::state::ResumeStore) persisting the
//! last-processed oplog timestamp, and the
//! [`Publisher`](bucatini_core::publish::Publisher) delivering change
//! messages over pub/sub. Both share one [`RedisConfig`] and one
//! `deadpool-redis` connection pool.
//!
//! # Example
//!
//! ```rust,no_run
//! use bucatini_redis::{RedisConfig, RedisPublisher, RedisResumeStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedisConfig::builder()
//!     .url("redis://localhost:6379")
//!     .key_prefix("myapp")
//!     .build()?;
//!
//! let pool = config.connect().await?;
//! let store = RedisResumeStore::new(pool.clone(), &config);
//! let publisher = RedisPublisher::new(pool, &config);
//! # let _ = (store, publisher);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod publisher;
mod retry;
pub mod store;

pub use config::{RedisConfig, RedisConfigBuilder, RedisConfigError};
pub use publisher::RedisPublisher;
pub use store::RedisResumeStore;
