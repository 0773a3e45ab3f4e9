// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST admin routes: health, create, snapshot, delete, resize.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ProxyError;
use crate::events::Reason;
use crate::session::{self, CreateRequest};
use crate::state::{epoch_ms, AppState, SessionMeta, SessionState, SessionView};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub ts: u64,
}

/// `GET /healthz`.
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true, ts: epoch_ms() })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnectionRequest {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnectionResponse {
    pub id: String,
    pub state: SessionState,
    pub created_at: u64,
    pub last_activity_at: u64,
    pub idle_timeout_ms: u64,
    pub ws_path: String,
    pub meta: SessionMeta,
}

/// `POST /connections`. Unlike every other admin route, a create failure is
/// reported as 500 regardless of error kind (`CapacityExceeded` included) —
/// the REST contract's 400 is reserved for missing required fields only.
pub async fn create_connection(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateConnectionRequest>,
) -> impl IntoResponse {
    let req = CreateRequest {
        host: body.host,
        port: body.port,
        username: body.username,
        password: body.password,
        cols: body.cols,
        rows: body.rows,
        idle_timeout_ms: body.idle_timeout_ms,
    };

    match session::create_session(&state, req).await {
        Ok(view) => {
            let ws_path = format!("{}/ws/{}", state.config.normalized_base_path(), view.id);
            let response = CreateConnectionResponse {
                id: view.id,
                state: view.state,
                created_at: view.created_at,
                last_activity_at: view.last_activity_at,
                idle_timeout_ms: view.idle_timeout_ms,
                ws_path,
                meta: view.meta,
            };
            (StatusCode::CREATED, Json(response)).into_response()
        }
        Err((err, detail)) => {
            let status = if err == ProxyError::InvalidRequest {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            let (_, body) = err.to_create_response(detail);
            (status, body).into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListConnectionsResponse {
    pub version: u64,
    pub ts: u64,
    pub connections: Vec<SessionView>,
}

/// `GET /connections`.
pub async fn list_connections(State(state): State<Arc<AppState>>) -> Json<ListConnectionsResponse> {
    Json(ListConnectionsResponse {
        version: state.bus.version(),
        ts: epoch_ms(),
        connections: state.snapshot_all().await,
    })
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// `DELETE /connections/{id}`.
pub async fn delete_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if session::terminate_session(&state, &id, Reason::Deleted, false).await {
        (StatusCode::OK, Json(OkResponse { ok: true })).into_response()
    } else {
        let (status, body) = ProxyError::NotFound.to_response("unknown connection id");
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ResizeRequest {
    pub cols: f64,
    pub rows: f64,
}

#[derive(Debug, Serialize)]
pub struct ResizeResponse {
    pub ok: bool,
    pub cols: u16,
    pub rows: u16,
}

/// `POST /connections/{id}/resize`.
pub async fn resize_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ResizeRequest>,
) -> impl IntoResponse {
    if !body.cols.is_finite() || !body.rows.is_finite() || body.cols <= 0.0 || body.rows <= 0.0 {
        let (status, body) =
            ProxyError::InvalidRequest.to_response("cols and rows must be finite and positive");
        return (status, body).into_response();
    }

    match session::resize_session(&state, &id, body.cols as u16, body.rows as u16).await {
        Ok((cols, rows)) => (StatusCode::OK, Json(ResizeResponse { ok: true, cols, rows })).into_response(),
        Err(err) => {
            let (status, body) = err.to_response("unknown connection id or not ready");
            (status, body).into_response()
        }
    }
}
