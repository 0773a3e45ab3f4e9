// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the ssh-mux proxy, loaded from CLI flags or environment
/// variables (env takes the flag's place when the flag is omitted).
#[derive(Debug, Clone, clap::Parser)]
pub struct ProxyConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "PORT")]
    pub port: u16,

    /// Path prefix under which all routes are served (e.g. "/api").
    /// Normalized to a leading slash with no trailing slash; empty means no prefix.
    #[arg(long, default_value = "", env = "BASE_PATH")]
    pub base_path: String,

    /// Default per-session idle budget in milliseconds.
    #[arg(long, default_value_t = 600_000, env = "IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: u64,

    /// Idle sweeper scan interval in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "SWEEP_INTERVAL_MS")]
    pub sweep_interval_ms: u64,

    /// Maximum number of concurrently managed sessions.
    #[arg(long, default_value_t = 100, env = "MAX_CONNECTIONS")]
    pub max_connections: usize,

    /// Server-sent event heartbeat interval in milliseconds.
    #[arg(long, default_value_t = 15_000, env = "SSE_HEARTBEAT_MS")]
    pub sse_heartbeat_ms: u64,

    /// Comma-separated list of allowed CORS origins, or "*" for all.
    #[arg(long, default_value = "*", env = "ALLOWED_ORIGINS")]
    pub allowed_origins: String,
}

impl ProxyConfig {
    /// Normalize `base_path`: leading slash, no trailing slash, `""` stays `""`.
    pub fn normalized_base_path(&self) -> String {
        let trimmed = self.base_path.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }

    /// Parsed allow-list. A single `*` entry means "allow all origins".
    pub fn allowed_origins(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn allows_all_origins(&self) -> bool {
        self.allowed_origins().iter().any(|o| o == "*")
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn sse_heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.sse_heartbeat_ms)
    }
}
