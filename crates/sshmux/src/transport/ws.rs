// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket attachment handler per spec §4.4: decodes control frames,
//! forwards stdin to the shell, respects the read-only flag, and emits
//! pings/detach responses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::session;
use crate::state::{decode_text_frame, AppState, DecodedFrame, Peer, PeerFrame, SessionState};

const ATTACHED_BANNER: &str = "\r\n[attached]\r\n";

#[derive(Debug, Clone, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "readOnly", default)]
    pub read_only: Option<u8>,
}

/// `GET /ws/{id}` — upgrade to a WebSocket attachment for session `id`.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let read_only = query.read_only.unwrap_or(0) == 1;
    ws.on_upgrade(move |socket| handle_ws(socket, state, id, read_only))
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let _ = socket.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
}

/// Per-connection handler: steps 1-6 of spec §4.4.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, id: String, read_only: bool) {
    let Some(session) = state.lookup(&id).await else {
        close_with(&mut socket, 1011, "Connection not ready").await;
        return;
    };
    if !session.is_state(SessionState::Ready).await {
        close_with(&mut socket, 1011, "Connection not ready").await;
        return;
    }

    let peer_id = session.next_peer_id.fetch_add(1, Ordering::Relaxed);
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<PeerFrame>();
    let peer = Arc::new(Peer { id: peer_id, read_only, outbox: outbox_tx, open: AtomicBool::new(true) });

    session::attach_peer(&state, &session, peer.clone()).await;
    let _ = peer.outbox.send(PeerFrame::Text(ATTACHED_BANNER.to_owned()));

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            frame = outbox_rx.recv() => {
                match frame {
                    Some(PeerFrame::Binary(bytes)) => {
                        if ws_tx.send(Message::Binary(bytes.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(PeerFrame::Text(text)) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(PeerFrame::Close { code, reason }) => {
                        let _ = ws_tx.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
                        break;
                    }
                    None => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let decoded = decode_text_frame(text.as_str());
                        session::dispatch_frame(&state, &session, &peer, decoded).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        session::dispatch_frame(&state, &session, &peer, DecodedFrame::Raw(bytes.to_vec())).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    peer.mark_closed();
    if !session.cancel.is_cancelled() {
        session::detach_peer(&state, &session, peer_id).await;
    }
}
