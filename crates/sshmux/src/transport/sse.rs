// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-sent event stream on `/connections/stream`, driven by the
//! notification bus (spec §4.8, §6).

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures_util::stream::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::events::{Reason, Summary};
use crate::state::{epoch_ms, AppState};

/// `GET /connections/stream`. Sends a `: connected` comment on open, a
/// synthetic `state`-reason summary as the first data frame, every
/// subsequent [`Summary`] published on the bus, and a `: hb` comment every
/// `config.sse_heartbeat_ms`. Each data frame carries an incrementing `id:`.
pub async fn connections_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        if tx.send(Ok(Event::default().comment("connected"))).await.is_err() {
            return;
        }

        let next_id = AtomicU64::new(0);
        let frame = |summary: &Summary| {
            Ok(Event::default()
                .id(next_id.fetch_add(1, Ordering::Relaxed).to_string())
                .event("connections")
                .data(serde_json::to_string(summary).unwrap_or_default()))
        };

        let initial = Summary {
            version: state.bus.version(),
            ts: epoch_ms(),
            reason: Reason::State,
            changed_ids: Vec::new(),
            counts: state.counts().await,
        };
        if tx.send(frame(&initial)).await.is_err() {
            return;
        }

        let mut bus_rx = state.bus.subscribe();
        let mut heartbeat = tokio::time::interval(state.config.sse_heartbeat_interval());
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = heartbeat.tick() => {
                    if tx.send(Ok(Event::default().comment("hb"))).await.is_err() {
                        break;
                    }
                }
                received = bus_rx.recv() => {
                    match received {
                        Ok(summary) => {
                            if tx.send(frame(&summary)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    Sse::new(ReceiverStream::new(rx))
}
