// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The notification bus: a versioned, best-effort change-event publisher.
//!
//! Every registry mutation (create, state transition, peer attach/detach,
//! resize, delete, idle-timeout) calls [`NotificationBus::publish`] exactly
//! once. Subscribers get a compact [`Summary`] rather than the mutation
//! itself; slow or dead subscribers never block the publisher.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why a [`Summary`] was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    Created,
    Deleted,
    State,
    WsAttached,
    WsDetached,
    Resize,
    IdleTimeout,
}

/// Per-state session counts as of the publish instant.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Counts {
    pub total: usize,
    pub ready: usize,
    pub connecting: usize,
    pub error: usize,
    pub closed: usize,
}

/// A compact change-notification delivered to every subscriber of the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub version: u64,
    pub ts: u64,
    pub reason: Reason,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed_ids: Vec<String>,
    pub counts: Counts,
}

/// Versioned change-event publisher.
///
/// Wraps a [`broadcast::Sender`] the way the sibling mux proxy's `Aggregator`
/// wraps its event channel, but tracks its own monotonic version counter
/// instead of relying on a cache.
pub struct NotificationBus {
    tx: broadcast::Sender<Summary>,
    version: std::sync::atomic::AtomicU64,
}

impl NotificationBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx, version: std::sync::atomic::AtomicU64::new(0) }
    }

    /// The most recently published version, without publishing. Used to
    /// stamp the synthetic initial summary a new SSE subscriber receives.
    pub fn version(&self) -> u64 {
        self.version.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Subscribe to the bus. Delivery is best-effort: a lagging receiver
    /// silently skips ahead (see [`tokio_stream::wrappers::errors::BroadcastStreamRecvError`]
    /// handling at the SSE transport) rather than blocking this sender.
    pub fn subscribe(&self) -> broadcast::Receiver<Summary> {
        self.tx.subscribe()
    }

    /// Atomically bump the version, stamp the current time, and deliver a
    /// [`Summary`] built from the given reason/ids/counts. Returns the
    /// published summary (useful for synthesizing the initial one a new
    /// subscriber receives).
    pub fn publish(&self, reason: Reason, changed_ids: Vec<String>, counts: Counts) -> Summary {
        let version = self.version.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        let summary = Summary { version, ts: crate::state::epoch_ms(), reason, changed_ids, counts };
        let _ = self.tx.send(summary.clone());
        summary
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_strictly_increase() {
        let bus = NotificationBus::new();
        let a = bus.publish(Reason::Created, vec!["x".into()], Counts::default());
        let b = bus.publish(Reason::Deleted, vec!["x".into()], Counts::default());
        assert!(a.version < b.version);
    }

    #[tokio::test]
    async fn subscribers_receive_published_summaries() -> anyhow::Result<()> {
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Reason::Created, vec!["a".into()], Counts { total: 1, ..Default::default() });
        let summary = rx.recv().await?;
        assert_eq!(summary.reason, Reason::Created);
        assert_eq!(summary.counts.total, 1);
        Ok(())
    }
}
