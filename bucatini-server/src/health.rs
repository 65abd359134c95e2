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

//! Liveness endpoint.

use axum::{routing::get, Router};
use std::io;
use tokio::net::TcpListener;
use tracing::info;

/// Serves `GET /healthz` on the given port until the process exits.
pub async fn serve(port: u16) -> io::Result<()> {
    let app = Router::new().route("/healthz", get(healthz));
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "health endpoint listening");
    axum::serve(listener, app).await
}

async fn healthz() -> &'static str {
    "OK"
}
