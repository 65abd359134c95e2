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

//! Bucatini server: tails the replica-set oplog and republishes per-document
//! change notifications over Redis pub/sub.
//!
//! A single long-running foreground process. SIGINT/SIGTERM drains the
//! in-flight entry and exits 0; failing to reach MongoDB or Redis at startup
//! exits non-zero.

mod conf;
mod health;

use bucatini_core::metrics::init_metrics;
use bucatini_core::pipeline::{Pipeline, PipelineConfig};
use bucatini_redis::{RedisConfig, RedisPublisher, RedisResumeStore};
use conf::Config;
use envconfig::Envconfig;
use mongodb::bson::doc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = match Config::init_from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("invalid configuration: {error}");
            std::process::exit(2);
        }
    };

    init_tracing(config.log_debug);

    if let Err(error) = run(config).await {
        error!(%error, "startup failed");
        std::process::exit(1);
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    init_metrics();

    let mongo = mongodb::Client::with_uri_str(&config.mongo_url).await?;
    mongo.database("admin").run_command(doc! { "ping": 1 }).await?;
    info!("connected to MongoDB");

    let redis_config = RedisConfig::builder()
        .url(config.redis_url.as_str())
        .key_prefix(config.redis_prefix.as_str())
        .build()?;
    let pool = redis_config.connect().await?;
    info!("connected to Redis");

    let store = RedisResumeStore::new(pool.clone(), &redis_config);
    let publisher = RedisPublisher::new(pool, &redis_config);

    let pipeline_config = PipelineConfig::builder()
        .max_catch_up(Duration::from_secs(config.max_catch_up_seconds))
        .build()?;
    let pipeline = Pipeline::new(mongo, store, publisher, pipeline_config);

    let http_port = config.http_port;
    tokio::spawn(async move {
        if let Err(error) = health::serve(http_port).await {
            error!(%error, "health endpoint failed");
        }
    });

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, draining");
        let _ = stop_tx.send(true);
    });

    pipeline.run(stop_rx).await;
    info!("clean shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(error) => {
                error!(%error, "unable to install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
