// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::events::{Counts, NotificationBus};
use crate::ssh::{ShellWriter, SshConnector};

pub const DEFAULT_COLS: u16 = 120;
pub const DEFAULT_ROWS: u16 = 30;

/// Return current epoch millis, the wall-clock source shared by
/// `lastActivityAt`, `createdAt`, idle comparisons, and `/healthz`'s `ts`.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A session's place in its state machine. Once `Closed` or `Error`, never
/// leaves (irreversible terminal states, spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Ready,
    Closed,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }
}

/// Informational connection metadata, returned in snapshots. Never carries
/// the password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub host: String,
    pub port: u16,
    pub username: String,
}

/// A connected WebSocket peer attached to a session.
pub struct Peer {
    pub id: u64,
    pub read_only: bool,
    pub outbox: tokio::sync::mpsc::UnboundedSender<PeerFrame>,
    pub open: AtomicBool,
}

impl Peer {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Relaxed);
    }
}

/// An outbound frame queued for delivery to a single peer's WebSocket task.
pub enum PeerFrame {
    Binary(Vec<u8>),
    Text(String),
    Close { code: u16, reason: &'static str },
}

/// A registered SSH session: one transport, one PTY shell, N attached peers.
pub struct Session {
    pub id: String,
    pub state: RwLock<SessionState>,
    pub created_at: u64,
    pub last_activity_at: AtomicI64,
    pub idle_timeout_ms: u64,
    pub cols: AtomicU16,
    pub rows: AtomicU16,
    pub meta: SessionMeta,
    pub shell: RwLock<Option<ShellWriter>>,
    pub peers: RwLock<HashMap<u64, Arc<Peer>>>,
    pub next_peer_id: std::sync::atomic::AtomicU64,
    pub cancel: CancellationToken,
}

impl Session {
    pub fn new(id: String, meta: SessionMeta, idle_timeout_ms: u64, cols: u16, rows: u16) -> Self {
        let now = epoch_ms();
        Self {
            id,
            state: RwLock::new(SessionState::Connecting),
            created_at: now,
            last_activity_at: AtomicI64::new(now as i64),
            idle_timeout_ms,
            cols: AtomicU16::new(cols),
            rows: AtomicU16::new(rows),
            meta,
            shell: RwLock::new(None),
            peers: RwLock::new(HashMap::new()),
            next_peer_id: std::sync::atomic::AtomicU64::new(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn touch(&self) {
        self.last_activity_at.store(epoch_ms() as i64, Ordering::Relaxed);
    }

    pub async fn is_state(&self, want: SessionState) -> bool {
        *self.state.read().await == want
    }

    pub async fn snapshot(&self) -> SessionView {
        let state = *self.state.read().await;
        let attached_clients = self.peers.read().await.values().filter(|p| p.is_open()).count();
        SessionView {
            id: self.id.clone(),
            state,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at.load(Ordering::Relaxed) as u64,
            idle_timeout_ms: self.idle_timeout_ms,
            attached_clients,
            cols: self.cols.load(Ordering::Relaxed),
            rows: self.rows.load(Ordering::Relaxed),
            meta: self.meta.clone(),
        }
    }
}

/// Public view of a session exposed by snapshots; never the SSH password or
/// raw handles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub state: SessionState,
    pub created_at: u64,
    pub last_activity_at: u64,
    pub idle_timeout_ms: u64,
    pub attached_clients: usize,
    pub cols: u16,
    pub rows: u16,
    pub meta: SessionMeta,
}

/// A control frame sent by a peer, or the fallback "treat as raw bytes".
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Control(ControlFrame),
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Resize { cols: Option<f64>, rows: Option<f64> },
    Stdin { data: Option<String> },
    Ping,
    Detach,
}

/// Decode an inbound text frame per spec §4.4: trimmed text that looks like
/// a JSON object is parsed as a tagged [`ControlFrame`]; anything else
/// (including well-formed JSON without a recognized `type`) is raw passthrough.
pub fn decode_text_frame(text: &str) -> DecodedFrame {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        if let Ok(frame) = serde_json::from_str::<ControlFrame>(trimmed) {
            return DecodedFrame::Control(frame);
        }
    }
    DecodedFrame::Raw(text.as_bytes().to_vec())
}

/// The session registry: the single source of truth for which sessions
/// exist, plus the notification bus and SSH connector shared by all of them.
pub struct AppState {
    pub sessions: RwLock<HashMap<String, Arc<Session>>>,
    pub config: ProxyConfig,
    pub bus: NotificationBus,
    pub connector: Arc<dyn SshConnector>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ProxyConfig, connector: Arc<dyn SshConnector>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            bus: NotificationBus::new(),
            connector,
            shutdown: CancellationToken::new(),
        }
    }

    /// Insert a newly-created session, atomically checking capacity against
    /// the registry size. Fails with `CapacityExceeded` if the registry is
    /// already at `MAX_CONNECTIONS`.
    pub async fn insert(&self, session: Arc<Session>) -> Result<(), ProxyError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.config.max_connections {
            return Err(ProxyError::CapacityExceeded);
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    pub async fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove a session from the registry. Idempotent: returns whether a
    /// removal actually happened.
    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn snapshot_all(&self) -> Vec<SessionView> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut views = Vec::with_capacity(sessions.len());
        for session in sessions {
            views.push(session.snapshot().await);
        }
        views
    }

    /// Scan the registry and compute per-state counts as of right now, for
    /// use by [`NotificationBus::publish`].
    pub async fn counts(&self) -> Counts {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut counts = Counts { total: sessions.len(), ..Default::default() };
        for session in &sessions {
            match *session.state.read().await {
                SessionState::Ready => counts.ready += 1,
                SessionState::Connecting => counts.connecting += 1,
                SessionState::Error => counts.error += 1,
                SessionState::Closed => counts.closed += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_resize_control_frame() {
        let decoded = decode_text_frame(r#"{"type":"resize","cols":80,"rows":24}"#);
        assert_eq!(
            decoded,
            DecodedFrame::Control(ControlFrame::Resize { cols: Some(80.0), rows: Some(24.0) })
        );
    }

    #[test]
    fn decodes_ping_control_frame() {
        assert_eq!(decode_text_frame(r#"{"type":"ping"}"#), DecodedFrame::Control(ControlFrame::Ping));
    }

    #[test]
    fn falls_back_to_raw_for_non_json() {
        let decoded = decode_text_frame("ls -la\n");
        assert_eq!(decoded, DecodedFrame::Raw(b"ls -la\n".to_vec()));
    }

    #[test]
    fn falls_back_to_raw_for_json_without_recognized_type() {
        let decoded = decode_text_frame(r#"{"foo":"bar"}"#);
        assert_eq!(decoded, DecodedFrame::Raw(br#"{"foo":"bar"}"#.to_vec()));
    }

    struct NoopConnector;

    #[async_trait::async_trait]
    impl SshConnector for NoopConnector {
        async fn connect_and_open_shell(
            &self,
            _params: crate::ssh::ConnectParams,
        ) -> Result<(ShellWriter, tokio::sync::mpsc::Receiver<crate::ssh::ShellEvent>), ProxyError>
        {
            Err(ProxyError::ConnectError)
        }
    }

    #[tokio::test]
    async fn insert_enforces_capacity() {
        let mut config_base = test_config();
        config_base.max_connections = 1;
        let state = AppState::new(config_base, Arc::new(NoopConnector));
        let s1 = Arc::new(Session::new(
            "a".into(),
            SessionMeta { host: "h".into(), port: 22, username: "u".into() },
            60_000,
            DEFAULT_COLS,
            DEFAULT_ROWS,
        ));
        let s2 = Arc::new(Session::new(
            "b".into(),
            SessionMeta { host: "h".into(), port: 22, username: "u".into() },
            60_000,
            DEFAULT_COLS,
            DEFAULT_ROWS,
        ));
        assert!(state.insert(s1).await.is_ok());
        assert_eq!(state.insert(s2).await, Err(ProxyError::CapacityExceeded));
    }

    fn test_config() -> ProxyConfig {
        ProxyConfig {
            host: "0.0.0.0".into(),
            port: 0,
            base_path: String::new(),
            idle_timeout_ms: 600_000,
            sweep_interval_ms: 30_000,
            max_connections: 100,
            sse_heartbeat_ms: 15_000,
            allowed_origins: "*".into(),
        }
    }
}
