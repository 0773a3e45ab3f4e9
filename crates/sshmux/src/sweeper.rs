// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The idle sweeper: periodically reaps sessions with no open peers whose
//! activity is older than their configured budget.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::events::Reason;
use crate::session::terminate_session;
use crate::state::{epoch_ms, AppState};

/// Spawn the background sweep task. Ticks every `config.sweep_interval_ms`;
/// unblocks immediately on `state.shutdown` so it never holds the process
/// open.
pub fn spawn_idle_sweeper(state: Arc<AppState>) {
    let interval = state.config.sweep_interval();

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            sweep_once(&state).await;
        }
    });
}

/// Run a single sweep pass: terminate every session with no open peer whose
/// `lastActivityAt` is older than its `idleTimeoutMs`. Tolerates concurrent
/// termination of the same session racing a delete, since `terminate_session`
/// is itself idempotent.
async fn sweep_once(state: &Arc<AppState>) {
    let sessions: Vec<Arc<crate::state::Session>> =
        state.sessions.read().await.values().cloned().collect();
    let now = epoch_ms() as i64;

    for session in sessions {
        let has_open_peer = session.peers.read().await.values().any(|p| p.is_open());
        if has_open_peer {
            continue;
        }
        let last_activity = session.last_activity_at.load(Ordering::Relaxed);
        let idle_for = now.saturating_sub(last_activity) as u64;
        if idle_for > session.idle_timeout_ms {
            terminate_session(state, &session.id, Reason::IdleTimeout, false).await;
        }
    }
}
