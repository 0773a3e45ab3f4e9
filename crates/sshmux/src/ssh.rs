// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSH transport + PTY shell adapter.
//!
//! Establishes the SSH transport, requests an interactive PTY shell, and
//! exposes it as a cheap, cloneable write handle plus a single-consumer
//! stream of shell events. The connector is behind a trait so the session
//! engine can be driven by a fake in tests without touching the network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::ChannelMsg;
use russh_keys::key::PublicKey;
use tokio::sync::mpsc;

use crate::error::ProxyError;

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_KEEPALIVE_MAX: usize = 3;
const TERM: &str = "xterm-256color";

#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub cols: u16,
    pub rows: u16,
}

/// A byte chunk emitted by the remote shell, or a terminal event.
#[derive(Debug)]
pub enum ShellEvent {
    Data(Vec<u8>),
    Closed,
    Error(String),
}

/// Cheap, cloneable handle for driving a live PTY shell. Dropping every clone
/// lets the underlying channel pump task observe closed senders and exit.
#[derive(Clone)]
pub struct ShellWriter {
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    resize_tx: mpsc::UnboundedSender<(u16, u16)>,
    close_tx: mpsc::UnboundedSender<()>,
}

impl ShellWriter {
    pub fn write(&self, data: Vec<u8>) {
        let _ = self.write_tx.send(data);
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        let _ = self.resize_tx.send((cols, rows));
    }

    pub fn close(&self) {
        let _ = self.close_tx.send(());
    }

    /// Build a [`ShellWriter`] over caller-supplied channels, for driving the
    /// session engine against a fake connector in tests.
    pub fn for_test(
        write_tx: mpsc::UnboundedSender<Vec<u8>>,
        resize_tx: mpsc::UnboundedSender<(u16, u16)>,
        close_tx: mpsc::UnboundedSender<()>,
    ) -> Self {
        Self { write_tx, resize_tx, close_tx }
    }
}

/// Establishes SSH transports and opens PTY shells.
#[async_trait]
pub trait SshConnector: Send + Sync {
    async fn connect_and_open_shell(
        &self,
        params: ConnectParams,
    ) -> Result<(ShellWriter, mpsc::Receiver<ShellEvent>), ProxyError>;
}

/// `russh`-backed connector used in production.
pub struct RusshConnector;

struct AcceptAnyServerKey;

#[async_trait]
impl client::Handler for AcceptAnyServerKey {
    type Error = russh::Error;

    // No host-key pinning or known_hosts persistence; password auth only.
    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    async fn connect_and_open_shell(
        &self,
        params: ConnectParams,
    ) -> Result<(ShellWriter, mpsc::Receiver<ShellEvent>), ProxyError> {
        let config = Arc::new(client::Config {
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
            keepalive_max: DEFAULT_KEEPALIVE_MAX,
            ..Default::default()
        });

        let addr = (params.host.as_str(), params.port);
        let connect_fut = client::connect(config, addr, AcceptAnyServerKey);
        let mut handle: Handle<AcceptAnyServerKey> =
            match tokio::time::timeout(DEFAULT_READY_TIMEOUT, connect_fut).await {
                Ok(Ok(handle)) => handle,
                Ok(Err(e)) => {
                    tracing::warn!(host = %params.host, port = params.port, err = %e, "ssh transport failed");
                    return Err(ProxyError::ConnectError);
                }
                Err(_) => {
                    tracing::warn!(host = %params.host, port = params.port, "ssh connect timed out");
                    return Err(ProxyError::ConnectError);
                }
            };

        let authenticated =
            handle.authenticate_password(&params.username, &params.password).await.map_err(
                |e| {
                    tracing::warn!(host = %params.host, err = %e, "ssh authentication error");
                    ProxyError::ConnectError
                },
            )?;
        if !authenticated {
            tracing::warn!(host = %params.host, user = %params.username, "ssh authentication rejected");
            return Err(ProxyError::ConnectError);
        }

        let mut channel = handle.channel_open_session().await.map_err(|e| {
            tracing::warn!(err = %e, "ssh channel open failed");
            ProxyError::ShellError
        })?;

        channel
            .request_pty(false, TERM, params.cols as u32, params.rows as u32, 0, 0, &[])
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "pty allocation failed");
                ProxyError::ShellError
            })?;

        channel.request_shell(false).await.map_err(|e| {
            tracing::warn!(err = %e, "shell request failed");
            ProxyError::ShellError
        })?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (resize_tx, mut resize_rx) = mpsc::unbounded_channel::<(u16, u16)>();
        let (close_tx, mut close_rx) = mpsc::unbounded_channel::<()>();

        tokio::spawn(async move {
            // Keep the transport handle alive for the lifetime of the pump.
            let _handle = handle;
            loop {
                tokio::select! {
                    biased;

                    _ = close_rx.recv() => {
                        let _ = channel.close().await;
                        break;
                    }
                    maybe = write_rx.recv() => {
                        match maybe {
                            Some(data) => {
                                if channel.data(&data[..]).await.is_err() {
                                    let _ = event_tx.send(ShellEvent::Error("write to shell failed".into())).await;
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    maybe = resize_rx.recv() => {
                        match maybe {
                            Some((cols, rows)) => {
                                let _ = channel.window_change(cols as u32, rows as u32, 0, 0).await;
                            }
                            None => break,
                        }
                    }
                    msg = channel.wait() => {
                        match msg {
                            Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                                if event_tx.send(ShellEvent::Data(data.to_vec())).await.is_err() {
                                    break;
                                }
                            }
                            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | Some(ChannelMsg::ExitStatus { .. }) => {
                                let _ = event_tx.send(ShellEvent::Closed).await;
                                break;
                            }
                            None => {
                                let _ = event_tx.send(ShellEvent::Closed).await;
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        Ok((ShellWriter { write_tx, resize_tx, close_tx }, event_rx))
    }
}
