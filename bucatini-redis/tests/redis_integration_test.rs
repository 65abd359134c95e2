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

//! Integration tests against a real Redis, via testcontainers.
//!
//! Run with `cargo test -- --ignored` (requires Docker).

use bson::Timestamp;
use bucatini_core::message::Publication;
use bucatini_core::publish::Publisher;
use bucatini_core::state::{ResumeStore, ResumeStoreError};
use bucatini_redis::{RedisConfig, RedisPublisher, RedisResumeStore};
use futures::StreamExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::Redis;

async fn start_redis() -> (testcontainers::ContainerAsync<Redis>, String) {
    let container = Redis::default()
        .start()
        .await
        .expect("failed to start Redis container");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("failed to get port");
    (container, format!("redis://127.0.0.1:{port}"))
}

fn config(url: &str) -> RedisConfig {
    RedisConfig::builder()
        .url(url)
        .key_prefix("bucatini-test")
        .pool_size(5)
        .build()
        .expect("valid config")
}

#[tokio::test]
#[ignore] // Requires Docker
async fn checkpoint_round_trips() {
    let (_container, url) = start_redis().await;
    let config = config(&url);
    let pool = config.connect().await.expect("failed to connect");
    let store = RedisResumeStore::new(pool, &config);

    let ts = Timestamp {
        time: 1_700_000_000,
        increment: 42,
    };
    store.save(ts).await.expect("failed to save checkpoint");

    let loaded = store.load().await.expect("failed to load checkpoint");
    assert_eq!(loaded.timestamp, ts);
    assert_eq!(store.key(), "bucatini-test:last-processed");
}

#[tokio::test]
#[ignore] // Requires Docker
async fn missing_checkpoint_is_distinguished() {
    let (_container, url) = start_redis().await;
    let config = config(&url);
    let pool = config.connect().await.expect("failed to connect");
    let store = RedisResumeStore::new(pool, &config);

    let result = store.load().await;
    assert!(matches!(result, Err(ResumeStoreError::Missing)));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn publisher_delivers_to_both_channels() {
    let (_container, url) = start_redis().await;
    let config = config(&url);
    let pool = config.connect().await.expect("failed to connect");
    let publisher = RedisPublisher::new(pool, &config);

    let client = redis::Client::open(url.as_str()).expect("valid url");
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .expect("failed to open pubsub connection");
    pubsub
        .subscribe("foo.bar")
        .await
        .expect("failed to subscribe");
    pubsub
        .subscribe("foo.bar::someid")
        .await
        .expect("failed to subscribe");

    let publication = Publication {
        collection_channel: "foo.bar".to_string(),
        specific_channel: "foo.bar::someid".to_string(),
        msg: r#"{"e":"i","d":{"_id":"someid"},"f":["some"]}"#.to_string(),
        timestamp: Timestamp {
            time: 1,
            increment: 0,
        },
    };
    publisher
        .publish(&publication)
        .await
        .expect("failed to publish");

    let mut stream = pubsub.on_message();
    let mut channels = Vec::new();
    for _ in 0..2 {
        let msg = tokio::time::timeout(std::time::Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for message")
            .expect("pubsub stream ended");
        let payload: String = msg.get_payload().expect("string payload");
        let decoded: serde_json::Value = serde_json::from_str(&payload).expect("valid JSON");
        assert_eq!(decoded["e"], serde_json::json!("i"));
        channels.push(msg.get_channel_name().to_string());
    }

    channels.sort();
    assert_eq!(channels, vec!["foo.bar", "foo.bar::someid"]);
}
