// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios spanning the idle sweeper, capacity enforcement, and
//! the server-sent event stream, driven over a real loopback listener.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use sshmux::config::ProxyConfig;
use sshmux::session::{create_session, CreateRequest};
use sshmux::state::AppState;
use sshmux::sweeper::spawn_idle_sweeper;
use sshmux::test_support::{spawn_http_server, test_config, FakeConnector};

fn req(idle_timeout_ms: Option<u64>) -> CreateRequest {
    CreateRequest {
        host: "h".into(),
        port: None,
        username: "u".into(),
        password: "p".into(),
        cols: None,
        rows: None,
        idle_timeout_ms,
    }
}

#[tokio::test]
async fn idle_sweep_reaps_session_with_no_peers() -> anyhow::Result<()> {
    let config = ProxyConfig { sweep_interval_ms: 20, ..test_config(10) };
    let state = Arc::new(AppState::new(config, FakeConnector::ok()));
    spawn_idle_sweeper(state.clone());

    let view = create_session(&state, req(Some(10))).await.expect("create succeeds");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(state.lookup(&view.id).await.is_none());
    Ok(())
}

#[tokio::test]
async fn capacity_admits_exactly_min_n_c_concurrently() -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(test_config(3), FakeConnector::ok()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let state = state.clone();
        handles.push(tokio::spawn(async move { create_session(&state, req(None)).await.is_ok() }));
    }

    let mut ok = 0;
    for handle in handles {
        if handle.await? {
            ok += 1;
        }
    }
    assert_eq!(ok, 3);
    Ok(())
}

/// Send a raw HTTP/1.1 GET and return the leading chunk of the response
/// (status line, headers, and the first handful of SSE frames).
async fn read_sse_prefix(addr: std::net::SocketAddr, path: &str) -> anyhow::Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut buf = vec![0u8; 4096];
    let mut collected = Vec::new();
    for _ in 0..20 {
        let read = tokio::time::timeout(Duration::from_millis(500), stream.read(&mut buf)).await;
        match read {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => {
                collected.extend_from_slice(&buf[..n]);
                if collected.windows(2).filter(|w| *w == b"\n\n").count() >= 2 {
                    break;
                }
            }
            Ok(Err(e)) => return Err(e.into()),
        }
    }
    Ok(String::from_utf8_lossy(&collected).into_owned())
}

#[tokio::test]
async fn sse_stream_opens_with_connected_comment_and_initial_summary() -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(test_config(10), FakeConnector::ok()));
    let (addr, _handle) = spawn_http_server(state).await?;

    let body = read_sse_prefix(addr, "/connections/stream").await?;
    assert!(body.contains("text/event-stream"));
    assert!(body.contains(": connected"));
    assert!(body.contains("event: connections"));
    assert!(body.contains(r#""reason":"state"#));
    Ok(())
}
