//! WebSocket feed of the live round
//!
//! Each client first receives the current round snapshot, then every round
//! event in sequence order. A client that falls behind the bus receives a
//! `resync` snapshot and continues from there. Heartbeats keep idle
//! connections open through proxies.

use super::handlers::AppState;
use crate::broadcast::{Delivery, EventEnvelope, RoundSnapshot};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Messages sent to clients
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage<'a> {
    /// Current state, sent once on connect
    Snapshot(&'a RoundSnapshot),
    /// Replacement state after the client fell behind
    Resync(&'a RoundSnapshot),
    Event(&'a EventEnvelope),
    Heartbeat { timestamp: DateTime<Utc> },
}

impl WsMessage<'_> {
    fn to_text(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(text) => Some(text),
            Err(e) => {
                error!("Failed to serialize websocket message: {}", e);
                None
            }
        }
    }
}

/// GET /ws
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let client_id = generate_client_id();
    let metrics = state.engine.metrics().clone();
    metrics.websocket_connected();
    info!(
        "🔌 WebSocket client {} connected (total: {})",
        client_id,
        metrics.websocket_clients()
    );

    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.engine.subscribe();
    let mut heartbeat = interval(state.engine.config().heartbeat_interval());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let send_client = client_id.clone();
    let mut send_task = tokio::spawn(async move {
        // The first interval tick fires immediately
        heartbeat.tick().await;

        loop {
            let text = tokio::select! {
                delivery = subscription.next() => match delivery {
                    Some(Delivery::Snapshot(snapshot)) => WsMessage::Snapshot(&snapshot).to_text(),
                    Some(Delivery::Resync(snapshot)) => {
                        warn!("WebSocket client {} fell behind; resyncing", send_client);
                        WsMessage::Resync(&snapshot).to_text()
                    }
                    Some(Delivery::Event(envelope)) => WsMessage::Event(&*envelope).to_text(),
                    None => break,
                },
                _ = heartbeat.tick() => WsMessage::Heartbeat { timestamp: Utc::now() }.to_text(),
            };

            let Some(text) = text else { continue };
            if sender.send(Message::Text(text)).await.is_err() {
                debug!("Client {} disconnected", send_client);
                break;
            }
        }
    });

    let recv_client = client_id.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Close(_)) => {
                    debug!("Client {} sent close", recv_client);
                    break;
                }
                Ok(Message::Text(text)) => {
                    // The feed is one-way; client text is only logged
                    debug!("Ignoring message from client {}: {}", recv_client, text);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error from client {}: {}", recv_client, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => receive_task.abort(),
        _ = &mut receive_task => send_task.abort(),
    }

    metrics.websocket_disconnected();
    info!(
        "🔌 WebSocket client {} disconnected (remaining: {})",
        client_id,
        metrics.websocket_clients()
    );
}

fn generate_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("ws-{}", id)
}
