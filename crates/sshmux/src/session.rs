// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admin operations facade: create, resize, terminate, and the fan-out
//! engine that bridges one SSH shell stream to N attached peers.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::ProxyError;
use crate::events::{Counts, Reason};
use crate::ssh::{ConnectParams, ShellEvent};
use crate::state::{
    AppState, DecodedFrame, Peer, PeerFrame, Session, SessionMeta, SessionState, SessionView,
    DEFAULT_COLS, DEFAULT_ROWS,
};

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub idle_timeout_ms: Option<u64>,
}

/// Admits the session (Connecting), connects SSH, opens the PTY shell, and
/// transitions to Ready (or Error) before returning. The caller sees either a
/// Ready snapshot or a `ConnectError`/`ShellError`; the session is removed
/// from the registry on failure.
pub async fn create_session(
    state: &Arc<AppState>,
    req: CreateRequest,
) -> Result<SessionView, (ProxyError, String)> {
    if req.host.trim().is_empty() || req.username.trim().is_empty() || req.password.is_empty() {
        return Err((ProxyError::InvalidRequest, "host, username, and password are required".into()));
    }

    let cols = req.cols.filter(|c| *c > 0).unwrap_or(DEFAULT_COLS);
    let rows = req.rows.filter(|r| *r > 0).unwrap_or(DEFAULT_ROWS);
    let idle_timeout_ms = req
        .idle_timeout_ms
        .filter(|ms| ms.is_finite_ms())
        .unwrap_or(state.config.idle_timeout_ms);

    let id = Uuid::new_v4().to_string();
    let meta = SessionMeta { host: req.host.clone(), port: req.port.unwrap_or(22), username: req.username.clone() };
    let session = Arc::new(Session::new(id.clone(), meta, idle_timeout_ms, cols, rows));

    state.insert(session.clone()).await.map_err(|e| {
        (e, format!("MAX_CONNECTIONS exceeded ({} sessions)", state.config.max_connections))
    })?;
    publish_counts(state, Reason::Created, vec![id.clone()]).await;

    let params = ConnectParams {
        host: req.host,
        port: req.port.unwrap_or(22),
        username: req.username,
        password: req.password,
        cols,
        rows,
    };

    match state.connector.connect_and_open_shell(params).await {
        Ok((writer, events)) => {
            *session.shell.write().await = Some(writer);
            *session.state.write().await = SessionState::Ready;
            spawn_fanout_pump(state.clone(), session.clone(), events);
            publish_counts(state, Reason::State, vec![id.clone()]).await;
            Ok(session.snapshot().await)
        }
        Err(err) => {
            *session.state.write().await = SessionState::Error;
            state.remove(&id).await;
            publish_counts(state, Reason::State, vec![id.clone()]).await;
            let detail = match err {
                ProxyError::ConnectError => "failed to establish SSH transport",
                ProxyError::ShellError => "failed to open PTY shell",
                _ => "failed to create session",
            };
            Err((err, detail.into()))
        }
    }
}

trait FiniteMs {
    fn is_finite_ms(&self) -> bool;
}

impl FiniteMs for u64 {
    fn is_finite_ms(&self) -> bool {
        *self > 0
    }
}

/// Valid only while Ready; outside Ready it is a no-op that reports
/// `NotFound` to HTTP callers.
pub async fn resize_session(
    state: &Arc<AppState>,
    id: &str,
    cols: u16,
    rows: u16,
) -> Result<(u16, u16), ProxyError> {
    let session = state.lookup(id).await.ok_or(ProxyError::NotFound)?;
    if !session.is_state(SessionState::Ready).await {
        return Err(ProxyError::NotFound);
    }
    Ok(apply_resize(state, &session, cols, rows).await)
}

/// Store the new dimensions, push a window-change to the PTY if one is open,
/// and publish the `resize` notification. Shared by the HTTP resize route and
/// the WS `resize` control frame so both paths behave identically (spec
/// §4.4 step 2 / §4.5).
async fn apply_resize(state: &Arc<AppState>, session: &Arc<Session>, cols: u16, rows: u16) -> (u16, u16) {
    session.cols.store(cols, Ordering::Relaxed);
    session.rows.store(rows, Ordering::Relaxed);
    session.touch();
    if let Some(writer) = session.shell.read().await.as_ref() {
        writer.resize(cols, rows);
    }
    publish_counts(state, Reason::Resize, vec![session.id.clone()]).await;
    (cols, rows)
}

/// Idempotent: closes every peer transport, releases the shell and SSH
/// handles, removes the session from the registry, and publishes exactly one
/// notification. Tolerates being invoked twice for the same session (delete
/// racing the idle sweeper).
///
/// `is_error` picks the terminal state for a `Reason::State` transition
/// (orderly shell/SSH close vs. an actual failure); `Reason::IdleTimeout` and
/// `Reason::Deleted` are always administrative and always land on `Closed`
/// regardless of `is_error` (spec §4.2's transition table).
pub async fn terminate_session(state: &Arc<AppState>, id: &str, reason: Reason, is_error: bool) -> bool {
    let Some(session) = state.lookup(id).await else {
        return false;
    };

    let target_state = if reason == Reason::IdleTimeout || reason == Reason::Deleted {
        SessionState::Closed
    } else if is_error {
        SessionState::Error
    } else {
        SessionState::Closed
    };

    {
        let mut guard = session.state.write().await;
        if guard.is_terminal() {
            return false;
        }
        *guard = target_state;
    }

    let close_code: (u16, &'static str) = if target_state == SessionState::Error {
        (1011, "Upstream failure")
    } else {
        (1001, "Administrative close")
    };

    let peers: Vec<Arc<Peer>> = session.peers.write().await.drain().map(|(_, p)| p).collect();
    for peer in peers {
        peer.mark_closed();
        let _ = peer.outbox.send(PeerFrame::Close { code: close_code.0, reason: close_code.1 });
    }

    if let Some(writer) = session.shell.write().await.take() {
        writer.close();
    }
    session.cancel.cancel();
    state.remove(id).await;
    publish_counts(state, reason, vec![id.to_owned()]).await;
    true
}

/// Copies shell output to every open peer and lets peer-originated writes
/// reach the shell via the peer's own handler (see `transport::ws`). Runs
/// until the shell event stream ends, at which point it terminates the
/// session (orderly close or upstream error).
fn spawn_fanout_pump(
    state: Arc<AppState>,
    session: Arc<Session>,
    mut events: tokio::sync::mpsc::Receiver<ShellEvent>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = session.cancel.cancelled() => break,
                event = events.recv() => {
                    match event {
                        Some(ShellEvent::Data(bytes)) => {
                            session.touch();
                            let peers: Vec<Arc<Peer>> =
                                session.peers.read().await.values().cloned().collect();
                            for peer in peers {
                                if peer.is_open() {
                                    let _ = peer.outbox.send(PeerFrame::Binary(bytes.clone()));
                                }
                            }
                        }
                        Some(ShellEvent::Closed) => {
                            terminate_session(&state, &session.id, Reason::State, false).await;
                            break;
                        }
                        Some(ShellEvent::Error(msg)) => {
                            tracing::warn!(session = %session.id, err = %msg, "shell stream error");
                            terminate_session(&state, &session.id, Reason::State, true).await;
                            break;
                        }
                        None => {
                            terminate_session(&state, &session.id, Reason::State, false).await;
                            break;
                        }
                    }
                }
            }
        }
    });
}

/// Add a peer to the session's peer set, touch activity, and publish
/// `ws-attached`.
pub async fn attach_peer(state: &Arc<AppState>, session: &Arc<Session>, peer: Arc<Peer>) {
    session.peers.write().await.insert(peer.id, peer);
    session.touch();
    publish_counts(state, Reason::WsAttached, vec![session.id.clone()]).await;
}

/// Remove a peer from the session's peer set, touch activity, and publish
/// `ws-detached`.
pub async fn detach_peer(state: &Arc<AppState>, session: &Arc<Session>, peer_id: u64) {
    session.peers.write().await.remove(&peer_id);
    session.touch();
    publish_counts(state, Reason::WsDetached, vec![session.id.clone()]).await;
}

/// Dispatch a decoded inbound peer frame to the shell, per spec §4.4 step 4.
/// `read_only` suppresses `resize`/`stdin` only; `ping`/`detach` still apply
/// (spec §9 open question on read-only control scope).
pub async fn dispatch_frame(state: &Arc<AppState>, session: &Arc<Session>, peer: &Arc<Peer>, frame: DecodedFrame) {
    session.touch();
    match frame {
        DecodedFrame::Control(crate::state::ControlFrame::Resize { cols, rows }) => {
            if peer.read_only {
                return;
            }
            if let (Some(cols), Some(rows)) = (cols, rows) {
                if cols.is_finite() && rows.is_finite() && cols > 0.0 && rows > 0.0 {
                    apply_resize(state, session, cols as u16, rows as u16).await;
                }
            }
        }
        DecodedFrame::Control(crate::state::ControlFrame::Stdin { data }) => {
            if peer.read_only {
                return;
            }
            if let Some(writer) = session.shell.read().await.as_ref() {
                writer.write(data.unwrap_or_default().into_bytes());
            }
        }
        DecodedFrame::Control(crate::state::ControlFrame::Ping) => {
            let _ = peer.outbox.send(PeerFrame::Text(r#"{"type":"pong"}"#.to_owned()));
        }
        DecodedFrame::Control(crate::state::ControlFrame::Detach) => {
            peer.mark_closed();
            let _ = peer.outbox.send(PeerFrame::Close { code: 1000, reason: "Detached" });
        }
        DecodedFrame::Raw(bytes) => {
            if peer.read_only {
                return;
            }
            if let Some(writer) = session.shell.read().await.as_ref() {
                writer.write(bytes);
            }
        }
    }
}

async fn publish_counts(state: &Arc<AppState>, reason: Reason, changed_ids: Vec<String>) {
    let counts: Counts = state.counts().await;
    state.bus.publish(reason, changed_ids, counts);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_config, test_state, AnyhowExt, FakeConnector};

    #[tokio::test]
    async fn create_succeeds_and_transitions_to_ready() -> anyhow::Result<()> {
        let state = test_state(10);
        let req = CreateRequest {
            host: "h".into(),
            port: None,
            username: "u".into(),
            password: "p".into(),
            cols: None,
            rows: None,
            idle_timeout_ms: None,
        };
        let view = create_session(&state, req).await.anyhow()?;
        assert_eq!(view.state, SessionState::Ready);
        assert_eq!(view.cols, DEFAULT_COLS);
        Ok(())
    }

    #[tokio::test]
    async fn create_rejects_missing_fields() {
        let state = test_state(10);
        let req = CreateRequest {
            host: String::new(),
            port: None,
            username: "u".into(),
            password: "p".into(),
            cols: None,
            rows: None,
            idle_timeout_ms: None,
        };
        let err = create_session(&state, req).await.unwrap_err();
        assert_eq!(err.0, ProxyError::InvalidRequest);
    }

    #[tokio::test]
    async fn create_fails_cleanly_on_connect_error() {
        let state = Arc::new(AppState::new(test_config(10), FakeConnector::failing()));
        let req = CreateRequest {
            host: "h".into(),
            port: None,
            username: "u".into(),
            password: "p".into(),
            cols: None,
            rows: None,
            idle_timeout_ms: None,
        };
        let err = create_session(&state, req).await.unwrap_err();
        assert_eq!(err.0, ProxyError::ConnectError);
        assert!(state.ids().await.is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() -> anyhow::Result<()> {
        let state = test_state(10);
        let req = CreateRequest {
            host: "h".into(),
            port: None,
            username: "u".into(),
            password: "p".into(),
            cols: None,
            rows: None,
            idle_timeout_ms: None,
        };
        let view = create_session(&state, req).await.anyhow()?;
        assert!(terminate_session(&state, &view.id, Reason::Deleted, false).await);
        assert!(!terminate_session(&state, &view.id, Reason::Deleted, false).await);
        Ok(())
    }

    #[tokio::test]
    async fn resize_updates_dimensions() -> anyhow::Result<()> {
        let state = test_state(10);
        let req = CreateRequest {
            host: "h".into(),
            port: None,
            username: "u".into(),
            password: "p".into(),
            cols: None,
            rows: None,
            idle_timeout_ms: None,
        };
        let view = create_session(&state, req).await.anyhow()?;
        let (cols, rows) = resize_session(&state, &view.id, 200, 50).await.anyhow()?;
        assert_eq!((cols, rows), (200, 50));
        let session = state.lookup(&view.id).await.ok_or_else(|| anyhow::anyhow!("not registered"))?;
        assert_eq!(session.snapshot().await.cols, 200);
        Ok(())
    }

    #[tokio::test]
    async fn capacity_admits_exactly_min_n_c() {
        let state = test_state(2);
        let mut ok = 0;
        for _ in 0..5 {
            let req = CreateRequest {
                host: "h".into(),
                port: None,
                username: "u".into(),
                password: "p".into(),
                cols: None,
                rows: None,
                idle_timeout_ms: None,
            };
            if create_session(&state, req).await.is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 2);
    }

    #[tokio::test]
    async fn orderly_shell_close_lands_on_closed_not_error() -> anyhow::Result<()> {
        let state = test_state(10);
        let req = CreateRequest {
            host: "h".into(),
            port: None,
            username: "u".into(),
            password: "p".into(),
            cols: None,
            rows: None,
            idle_timeout_ms: None,
        };
        let view = create_session(&state, req).await.anyhow()?;
        let session = state.lookup(&view.id).await.ok_or_else(|| anyhow::anyhow!("not registered"))?;
        assert!(terminate_session(&state, &session.id, Reason::State, false).await);
        assert_eq!(*session.state.read().await, SessionState::Closed);
        Ok(())
    }

    #[tokio::test]
    async fn shell_error_lands_on_error_not_closed() -> anyhow::Result<()> {
        let state = test_state(10);
        let req = CreateRequest {
            host: "h".into(),
            port: None,
            username: "u".into(),
            password: "p".into(),
            cols: None,
            rows: None,
            idle_timeout_ms: None,
        };
        let view = create_session(&state, req).await.anyhow()?;
        let session = state.lookup(&view.id).await.ok_or_else(|| anyhow::anyhow!("not registered"))?;
        assert!(terminate_session(&state, &session.id, Reason::State, true).await);
        assert_eq!(*session.state.read().await, SessionState::Error);
        Ok(())
    }

    #[tokio::test]
    async fn peer_resize_control_frame_publishes_notification_like_http_resize() -> anyhow::Result<()> {
        let state = test_state(10);
        let req = CreateRequest {
            host: "h".into(),
            port: None,
            username: "u".into(),
            password: "p".into(),
            cols: None,
            rows: None,
            idle_timeout_ms: None,
        };
        let view = create_session(&state, req).await.anyhow()?;
        let session = state.lookup(&view.id).await.ok_or_else(|| anyhow::anyhow!("not registered"))?;

        let mut bus_rx = state.bus.subscribe();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let peer = Arc::new(crate::state::Peer {
            id: 1,
            read_only: false,
            outbox: tx,
            open: std::sync::atomic::AtomicBool::new(true),
        });

        let frame = DecodedFrame::Control(crate::state::ControlFrame::Resize {
            cols: Some(200.0),
            rows: Some(50.0),
        });
        dispatch_frame(&state, &session, &peer, frame).await;

        assert_eq!(session.snapshot().await.cols, 200);
        let summary = bus_rx.recv().await?;
        assert_eq!(summary.reason, Reason::Resize);
        assert_eq!(summary.changed_ids, vec![session.id.clone()]);
        Ok(())
    }
}
