// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure for unit and integration tests: a fake SSH
//! connector that never touches the network, and a helper to spawn the
//! router on a real loopback port for WebSocket/SSE integration tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::ssh::{ConnectParams, ShellEvent, ShellWriter, SshConnector};
use crate::state::AppState;

/// A fake [`SshConnector`] that echoes every `write()` back as a
/// [`ShellEvent::Data`] chunk, so tests can exercise the fan-out engine
/// without a real SSH server. Configurable to fail the connect step.
pub struct FakeConnector {
    pub fail: bool,
}

impl FakeConnector {
    pub fn ok() -> Arc<dyn SshConnector> {
        Arc::new(Self { fail: false })
    }

    pub fn failing() -> Arc<dyn SshConnector> {
        Arc::new(Self { fail: true })
    }
}

#[async_trait]
impl SshConnector for FakeConnector {
    async fn connect_and_open_shell(
        &self,
        _params: ConnectParams,
    ) -> Result<(ShellWriter, mpsc::Receiver<ShellEvent>), ProxyError> {
        if self.fail {
            return Err(ProxyError::ConnectError);
        }

        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (resize_tx, mut resize_rx) = mpsc::unbounded_channel::<(u16, u16)>();
        let (close_tx, mut close_rx) = mpsc::unbounded_channel::<()>();
        let (event_tx, event_rx) = mpsc::channel(256);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = close_rx.recv() => break,
                    maybe = write_rx.recv() => {
                        match maybe {
                            Some(data) => {
                                if event_tx.send(ShellEvent::Data(data)).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    maybe = resize_rx.recv() => {
                        if maybe.is_none() {
                            break;
                        }
                    }
                }
            }
        });

        Ok((ShellWriter::for_test(write_tx, resize_tx, close_tx), event_rx))
    }
}

/// Build a bare-bones [`ProxyConfig`] suitable for tests, overriding only
/// `max_connections` (the field most tests care about).
pub fn test_config(max_connections: usize) -> ProxyConfig {
    ProxyConfig {
        host: "127.0.0.1".into(),
        port: 0,
        base_path: String::new(),
        idle_timeout_ms: 600_000,
        sweep_interval_ms: 30_000,
        max_connections,
        sse_heartbeat_ms: 15_000,
        allowed_origins: "*".into(),
    }
}

/// Build an [`AppState`] wired to a [`FakeConnector`] that never fails.
pub fn test_state(max_connections: usize) -> Arc<AppState> {
    Arc::new(AppState::new(test_config(max_connections), FakeConnector::ok()))
}

/// Spawn the full router on a real loopback TCP port, for tests that need an
/// actual WebSocket or SSE client (`tokio-tungstenite`, `reqwest`, ...).
pub async fn spawn_http_server(
    state: Arc<AppState>,
) -> anyhow::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = crate::transport::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}

/// Extension trait to convert any `Debug` error into `anyhow::Error`, so
/// tests can use `?` against core-engine `Result`s whose error types don't
/// implement `std::error::Error`. Replaces `.map_err(|e| anyhow::anyhow!("{e:?}"))`
/// with `.anyhow()`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Debug> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e:?}"))
    }
}
