// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CORS handling per spec §6: echo `Origin` when it matches the configured
//! allow-list (or the list contains `*`), permit `GET/POST/DELETE/OPTIONS`,
//! allow `content-type, authorization`, and allow credentials. `OPTIONS` on
//! any path short-circuits with 204 before reaching the router.

use std::sync::Arc;

use axum::http::{HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

const ALLOWED_METHODS: &str = "GET, POST, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "content-type, authorization";

fn allowed_origin(state: &AppState, origin: &str) -> bool {
    state.config.allows_all_origins() || state.config.allowed_origins().iter().any(|o| o == origin)
}

fn apply_cors_headers(response: &mut Response, origin: Option<&HeaderValue>) {
    let Ok(origin_str) = origin.map(|v| v.to_str()).transpose() else { return };
    let Some(origin_str) = origin_str else { return };
    if let Ok(value) = HeaderValue::from_str(origin_str) {
        response.headers_mut().insert("access-control-allow-origin", value);
    }
    response.headers_mut().insert("access-control-allow-credentials", HeaderValue::from_static("true"));
    response.headers_mut().insert("access-control-allow-methods", HeaderValue::from_static(ALLOWED_METHODS));
    response.headers_mut().insert("access-control-allow-headers", HeaderValue::from_static(ALLOWED_HEADERS));
}

/// Axum middleware applied to every request. Intercepts `OPTIONS` with a
/// bare 204; for all other methods it runs the inner handler and then
/// decorates the response with CORS headers when the request's `Origin` is
/// allowed.
pub async fn cors_layer(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let origin = req.headers().get(axum::http::header::ORIGIN).cloned();
    let origin_allowed =
        origin.as_ref().and_then(|v| v.to_str().ok()).is_some_and(|o| allowed_origin(&state, o));

    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        if origin_allowed {
            apply_cors_headers(&mut response, origin.as_ref());
        }
        return response;
    }

    let mut response = next.run(req).await;
    if origin_allowed {
        apply_cors_headers(&mut response, origin.as_ref());
    }
    response
}
