// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::JsonRpcServer;

/// Feed the raw request body to the JSON-RPC router and return whatever
/// it produced, batches included.
pub async fn handle(State(server): State<JsonRpcServer>, body: axum::body::Bytes) -> impl IntoResponse {
    let response = server.handle(body).await;
    Json(response)
}
