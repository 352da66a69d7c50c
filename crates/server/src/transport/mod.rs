// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the Tymbal control plane.

pub mod auth;
pub mod http;
pub mod ws_client;
pub mod ws_runtime;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::AppState;

/// Build the axum `Router` with every route the server exposes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(http::health))
        .route("/v1/spaces/{space_id}/bootstrap-token", post(http::issue_bootstrap_token))
        .route("/v1/bootstrap/exchange", post(http::exchange_bootstrap_token))
        .route("/v1/channels/{channel_id}/connections", get(http::channel_connections))
        .route("/ws/client", get(ws_client::ws_handler))
        .route("/ws/runtime", get(ws_runtime::ws_handler))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
