// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Error kinds the core engine can surface to the HTTP layer.
///
/// `PeerError` is deliberately absent here: per-peer send/receive failures
/// are recovered locally by the fan-out engine (the peer is detached) and
/// never bubble up to an admin-facing response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyError {
    InvalidRequest,
    CapacityExceeded,
    NotFound,
    NotReady,
    ConnectError,
    ShellError,
    Internal,
}

impl ProxyError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::CapacityExceeded => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound | Self::NotReady => StatusCode::NOT_FOUND,
            Self::ConnectError | Self::ShellError | Self::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::CapacityExceeded => "CAPACITY_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::NotReady => "NOT_READY",
            Self::ConnectError => "CONNECT_ERROR",
            Self::ShellError => "SHELL_ERROR",
            Self::Internal => "INTERNAL",
        }
    }

    /// Generic `{"error": {"code", "message"}}` envelope used by most routes.
    pub fn to_response(&self, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
        let body = ErrorResponse {
            error: ErrorBody { code: self.as_str().to_owned(), message: message.into() },
        };
        (self.http_status(), Json(body))
    }

    /// Flat `{"error", "detail"}` envelope, used only by `POST /connections`
    /// create failures per the REST contract.
    pub fn to_create_response(
        &self,
        detail: impl Into<String>,
    ) -> (StatusCode, Json<CreateErrorResponse>) {
        let body =
            CreateErrorResponse { error: self.as_str().to_owned(), detail: detail.into() };
        (self.http_status(), Json(body))
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope for most admin routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Flat error envelope for `POST /connections` create failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateErrorResponse {
    pub error: String,
    pub detail: String,
}
