// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The non-streaming HTTP surface: health, bootstrap-token exchange, and
//! connection diagnostics.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ServerError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// `GET /v1/health` — no auth required.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct BootstrapTokenResponse {
    pub token: String,
}

/// `POST /v1/spaces/{space_id}/bootstrap-token` — issue a single-use
/// bootstrap token for a runtime to redeem.
pub async fn issue_bootstrap_token(
    State(state): State<Arc<AppState>>,
    Path(space_id): Path<String>,
) -> Json<BootstrapTokenResponse> {
    let token = state.bootstrap.issue(space_id).await;
    Json(BootstrapTokenResponse { token })
}

#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ExchangeResponse {
    #[serde(rename = "spaceId")]
    pub space_id: String,
    pub credential: String,
}

/// `POST /v1/bootstrap/exchange` — redeem a bootstrap token for the
/// long-lived credential a runtime presents on its control connection.
pub async fn exchange_bootstrap_token(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExchangeRequest>,
) -> impl IntoResponse {
    match state.bootstrap.exchange(&body.token).await {
        Some(credential) => Json(ExchangeResponse { space_id: credential.space_id, credential: credential.token })
            .into_response(),
        None => ServerError::Unauthorized.to_http_response("bootstrap token unknown or expired").into_response(),
    }
}

/// `GET /v1/channels/{channel_id}/connections` — diagnostic listing of
/// live connections subscribed to a channel.
pub async fn channel_connections(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
) -> Json<Vec<crate::hub::ConnectionSnapshot>> {
    Json(state.hub.connections_in_channel(&channel_id).await)
}
