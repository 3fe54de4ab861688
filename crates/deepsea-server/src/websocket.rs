//! Live event stream over WebSocket at `/ws`.
//!
//! Each connection gets a snapshot of every observed value followed by live
//! events, one JSON message per frame. A subscriber evicted for falling
//! behind, or cut off by shutdown, sees its queue close and gets a close frame.

use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};

use deepsea_core::events::EventMessage;
use deepsea_storage::Subscription;

use crate::handlers::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        // Snapshot and registration happen together, after the upgrade succeeded.
        let subscription = state.registry.subscribe();
        handle_socket(socket, subscription, state.ping_interval).await;
    })
}

fn encode(message: &EventMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize event");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, subscription: Subscription, ping_interval: Duration) {
    let Subscription {
        snapshot,
        mut handle,
    } = subscription;
    let subscriber = handle.id();
    let (mut ws_write, mut ws_read) = socket.split();

    tracing::info!(subscriber = %subscriber, snapshot = snapshot.len(), "Event stream connected");

    // Reader: only watches for close and errors; pongs are answered by axum.
    let mut read_task = tokio::spawn(async move {
        while let Some(msg) = ws_read.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(data)) => {
                    tracing::trace!(bytes = data.len(), "Event stream ping received");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Event stream read error");
                    break;
                }
                _ => {}
            }
        }
    });

    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut delivered = 0usize;
    'snapshot: {
        for message in &snapshot {
            let Some(frame) = encode(message) else {
                continue;
            };
            if let Err(e) = ws_write.send(frame).await {
                tracing::debug!(error = %e, "Event stream write error");
                break 'snapshot;
            }
            delivered += 1;
        }

        loop {
            tokio::select! {
                next = handle.recv() => match next {
                    Some(message) => {
                        let Some(frame) = encode(&message) else {
                            continue;
                        };
                        if let Err(e) = ws_write.send(frame).await {
                            tracing::debug!(error = %e, "Event stream write error");
                            break;
                        }
                        delivered += 1;
                    }
                    None => {
                        // Evicted or shutting down.
                        let close = Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: Utf8Bytes::from_static("event stream closed"),
                        }));
                        let _ = ws_write.send(close).await;
                        break;
                    }
                },
                _ = ping.tick() => {
                    if ws_write.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
                _ = &mut read_task => {
                    tracing::debug!(subscriber = %subscriber, "Event stream client disconnected");
                    break;
                }
            }
        }
    }

    read_task.abort();
    // Dropping the handle unregisters the subscriber.
    drop(handle);
    tracing::info!(subscriber = %subscriber, delivered, "Event stream disconnected");
}
