//! Observer WebSocket: pushes a full tenant snapshot on every change.
//!
//! A session subscribes to all three stores for its tenant, sends one
//! snapshot immediately, and then re-reads and re-sends the whole snapshot
//! whenever any store signals a change. Signals are coalesced by the
//! one-slot subscription channels, so a burst of mutations costs at most a
//! couple of snapshots. A ping goes out every keepalive interval; a failed
//! write ends the session.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use futures_util::{SinkExt, StreamExt};
use pbxwatch_monitor::Monitor;
use pbxwatch_types::{MonitorSnapshot, TenantId};
use serde::{Deserialize, Serialize};

use crate::middleware::{parse_tenant, tenant_from_headers};
use crate::AppState;

/// Query parameters accepted on the observer socket.
#[derive(Debug, Deserialize)]
pub struct MonitorWsParams {
    /// Tenant id, for clients that cannot set headers on the upgrade.
    pub tenant: Option<String>,
}

/// Frames sent to observers.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutgoingFrame {
    Snapshot(MonitorSnapshot),
}

impl OutgoingFrame {
    fn snapshot(monitor: &Monitor, tenant: TenantId) -> Self {
        Self::Snapshot(monitor.snapshot(tenant))
    }
}

/// Handler for `GET /ws/monitor`.
pub async fn monitor_ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<MonitorWsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let tenant = tenant_from_headers(&headers)
        .or_else(|| params.tenant.as_deref().and_then(parse_tenant));
    let Some(tenant) = tenant else {
        tracing::warn!("monitor websocket connect without tenant");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.on_upgrade(move |socket| observe(socket, state, tenant))
}

async fn observe(socket: WebSocket, state: Arc<AppState>, tenant: TenantId) {
    let monitor = state.monitor.clone();
    let mut agents = monitor.agents.subscribe(tenant);
    let mut calls = monitor.calls.subscribe(tenant);
    let mut queues = monitor.queues.subscribe(tenant);
    tracing::info!(
        tenant = %tenant,
        observers = monitor.agents.subscriber_count(tenant),
        "monitor websocket connected"
    );

    let (mut sender, mut receiver) = socket.split();
    let mut keepalive = tokio::time::interval(state.keepalive.max(Duration::from_millis(100)));
    keepalive.tick().await;

    let mut pending = Some(OutgoingFrame::snapshot(&monitor, tenant));
    loop {
        if let Some(frame) = pending.take() {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(tenant = %tenant, "failed to serialize snapshot: {}", e);
                    break;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                tracing::debug!(tenant = %tenant, "observer write failed");
                break;
            }
        }

        tokio::select! {
            Some(_) = agents.changed() => pending = Some(OutgoingFrame::snapshot(&monitor, tenant)),
            Some(_) = calls.changed() => pending = Some(OutgoingFrame::snapshot(&monitor, tenant)),
            Some(_) = queues.changed() => pending = Some(OutgoingFrame::snapshot(&monitor, tenant)),
            _ = keepalive.tick() => {
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    tracing::debug!(tenant = %tenant, "observer ping failed");
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(tenant = %tenant, "observer read error: {}", e);
                    break;
                }
            },
        }
    }

    monitor.agents.unsubscribe(&agents);
    monitor.calls.unsubscribe(&calls);
    monitor.queues.unsubscribe(&queues);
    tracing::info!(tenant = %tenant, "monitor websocket disconnected");
}
