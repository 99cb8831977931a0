// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Websocket transport for the relay.
//!
//! Each logical channel is served at `/ws/{channel}`. Frames are JSON text;
//! outbound events pass through a writer task so a slow socket never blocks
//! the monitor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use pmrelay_core::config::ServerConfig;
use pmrelay_core::{Channel, HostProbe, Monitor, Pm2Client};

use crate::metrics;

pub type RelayMonitor = Monitor<Pm2Client, HostProbe>;

/// Longest a single frame write may take before the connection is dropped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct ServerState {
    monitor: Arc<RelayMonitor>,
    authorization: Option<Arc<str>>,
}

impl ServerState {
    fn authorized(&self, presented: Option<&str>) -> bool {
        match &self.authorization {
            Some(secret) => presented == Some(secret.as_ref()),
            None => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Handshake {
    auth: Option<String>,
}

/// Serve until Ctrl+C.
pub async fn run(
    config: &ServerConfig,
    monitor: Arc<RelayMonitor>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = ServerState {
        monitor,
        authorization: config.authorization.as_deref().map(Arc::from),
    };

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port.value()));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Relay listening on ws://{}/ws/{{channel}}", addr);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route("/ws/{channel}", get(ws_handler))
        .route("/api/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(channel): Path<String>,
    Query(handshake): Query<Handshake>,
    State(state): State<ServerState>,
) -> Response {
    let channel: Channel = match channel.parse() {
        Ok(channel) => channel,
        Err(e) => return (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    };

    if !state.authorized(handshake.auth.as_deref()) {
        tracing::warn!(channel = %channel, "Rejected viewer with bad authorization");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(state.monitor, channel, socket))
}

async fn handle_socket(monitor: Arc<RelayMonitor>, channel: Channel, socket: WebSocket) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (mut session, mut events) = monitor.connect(channel);
    let session_id = session.id();

    let write_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            let send = ws_sender.send(Message::Text(text.into()));
            match tokio::time::timeout(WRITE_TIMEOUT, send).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(session_id = %session_id, error = %e, "Socket write failed");
                    return;
                }
                Err(_) => {
                    tracing::warn!(session_id = %session_id, "Socket write timed out");
                    return;
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "Socket read failed");
                break;
            }
        };
        match msg {
            Message::Text(text) => session.handle_text(text.as_str()),
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => session.handle_text(text),
                Err(_) => {
                    tracing::warn!(session_id = %session_id, "Ignoring non-UTF-8 frame");
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    drop(session);
    write_task.abort();
}

async fn stats_handler(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.monitor.stats())
}

async fn metrics_handler(State(state): State<ServerState>) -> impl IntoResponse {
    metrics::record(&state.monitor.stats());
    metrics::render()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(authorization: Option<&str>) -> ServerState {
        use pmrelay_core::config::{DaemonConfig, MonitorSettings};
        let daemon = DaemonConfig {
            home: "/nonexistent/.pm2".into(),
            rpc_socket: "/nonexistent/.pm2/rpc.sock".into(),
            pub_socket: "/nonexistent/.pm2/pub.sock".into(),
            binary: "pm2".to_string(),
            event_poll_interval: Duration::from_secs(1),
        };
        ServerState {
            monitor: Monitor::new(
                MonitorSettings::default(),
                Pm2Client::new(&daemon),
                HostProbe::new(),
            ),
            authorization: authorization.map(Arc::from),
        }
    }

    #[tokio::test]
    async fn test_authorization_gate() {
        let open = state(None);
        assert!(open.authorized(None));
        assert!(open.authorized(Some("anything")));

        let gated = state(Some("s3cret"));
        assert!(gated.authorized(Some("s3cret")));
        assert!(!gated.authorized(Some("wrong")));
        assert!(!gated.authorized(None));
    }
}
