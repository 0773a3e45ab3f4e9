// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket + SSE transport for the ssh-mux proxy.

pub mod cors;
pub mod http;
pub mod sse;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum `Router` with every route in the REST/SSE/WS contract,
/// nested under the configured base path (empty means no prefix).
pub fn build_router(state: Arc<AppState>) -> Router {
    let base_path = state.config.normalized_base_path();

    let routes = Router::new()
        .route("/healthz", get(http::healthz))
        .route("/connections", post(http::create_connection).get(http::list_connections))
        .route("/connections/{id}", delete(http::delete_connection))
        .route("/connections/{id}/resize", post(http::resize_connection))
        .route("/connections/stream", get(sse::connections_stream))
        .route("/ws/{id}", get(ws::ws_handler));

    let app = if base_path.is_empty() { routes } else { Router::new().nest(&base_path, routes) };

    // Layered on the fully assembled router (after nesting) so the CORS
    // middleware's OPTIONS short-circuit covers every path, including ones
    // outside the nested base path that would otherwise fall through to the
    // router's default 404 with no CORS headers attached.
    app.layer(middleware::from_fn_with_state(state.clone(), cors::cors_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
