// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! sshmux: a multiplexing proxy exposing long-lived SSH PTY sessions to many
//! simultaneous WebSocket clients behind a small REST control plane.

pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod ssh;
pub mod state;
pub mod sweeper;
pub mod test_support;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::ProxyConfig;
use crate::ssh::RusshConnector;
use crate::state::AppState;
use crate::transport::build_router;

/// Run the proxy until shutdown. Builds the session registry, spawns the
/// idle sweeper, and serves the router until the bound listener's task is
/// cancelled.
pub async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);

    let state = Arc::new(AppState::new(config, Arc::new(RusshConnector)));
    sweeper::spawn_idle_sweeper(state.clone());

    tracing::info!("sshmux listening on {addr}");
    let router = build_router(state.clone());
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(state.shutdown.clone().cancelled_owned()).await?;

    Ok(())
}
