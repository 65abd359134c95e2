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

//! Environment-driven configuration.

use envconfig::Envconfig;

/// Runtime configuration, read from `BUCATINI_*` environment variables.
#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    /// Replica-set connection string.
    #[envconfig(from = "BUCATINI_MONGO_URL")]
    pub mongo_url: String,

    /// Sink connection string.
    #[envconfig(from = "BUCATINI_REDIS_URL")]
    pub redis_url: String,

    /// Key namespace for the resume checkpoint.
    #[envconfig(from = "BUCATINI_REDIS_PREFIX", default = "bucatini")]
    pub redis_prefix: String,

    /// Checkpoints older than this many seconds are discarded in favor of
    /// starting from the end of the oplog.
    #[envconfig(from = "BUCATINI_MAX_CATCH_UP_SECONDS", default = "60")]
    pub max_catch_up_seconds: u64,

    /// Raises log verbosity to debug when no RUST_LOG filter is set.
    #[envconfig(from = "BUCATINI_LOG_DEBUG", default = "false")]
    pub log_debug: bool,

    /// TCP port for the health endpoint.
    #[envconfig(from = "BUCATINI_HTTP_PORT", default = "9000")]
    pub http_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_required_and_default_values() {
        let vars: std::collections::HashMap<String, String> = [
            ("BUCATINI_MONGO_URL", "mongodb://localhost:27017/?replicaSet=rs0"),
            ("BUCATINI_REDIS_URL", "redis://localhost:6379"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = Config::init_from_hashmap(&vars).unwrap();
        assert_eq!(config.mongo_url, "mongodb://localhost:27017/?replicaSet=rs0");
        assert_eq!(config.redis_prefix, "bucatini");
        assert_eq!(config.max_catch_up_seconds, 60);
        assert!(!config.log_debug);
        assert_eq!(config.http_port, 9000);
    }

    #[test]
    fn missing_required_value_fails() {
        let vars = std::collections::HashMap::new();
        assert!(Config::init_from_hashmap(&vars).is_err());
    }
}
