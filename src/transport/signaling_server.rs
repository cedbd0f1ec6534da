//! Signaling WebSocket handler
//!
//! One task per upgraded socket. Inbound frames are decoded and handed to the
//! router; outbound frames are queued on the connection and written by a
//! separate writer task. The loop ends on close, socket error, or when the
//! liveness monitor terminates the connection.

use super::connection::{Connection, Outbound};
use crate::protocol::{CodecError, Message};
use crate::web::SignalingHub;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle a signaling WebSocket connection
pub async fn handle_signaling_connection(socket: WebSocket, remote: String, hub: Arc<SignalingHub>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (conn, mut rx) = Connection::new(remote);
    info!("New signaling connection {} from {}", conn.id(), conn.remote());

    hub.liveness.track(conn.clone());
    hub.metrics.connections.inc();

    // Forward queued frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let result = match frame {
                Outbound::Text(text) => ws_sender.send(WsMessage::Text(text.into())).await,
                Outbound::Ping => ws_sender.send(WsMessage::Ping(Bytes::new())).await,
                Outbound::Close => {
                    let _ = ws_sender.send(WsMessage::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = conn.terminated() => {
                debug!("Connection {} terminated", conn.id());
                break;
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    conn.mark_alive();
                    handle_frame(&hub, &conn, text.as_str().as_bytes());
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    conn.mark_alive();
                    handle_frame(&hub, &conn, &data);
                }
                Some(Ok(WsMessage::Pong(_))) | Some(Ok(WsMessage::Ping(_))) => {
                    conn.mark_alive();
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!("Connection {} closed by peer", conn.id());
                    break;
                }
                Some(Err(e)) => {
                    warn!("WebSocket error on connection {}: {}", conn.id(), e);
                    break;
                }
            }
        }
    }

    let endpoint = conn.endpoint_id();
    hub.router.disconnect(&conn);
    hub.liveness.untrack(conn.id());
    hub.metrics.connections.dec();
    conn.terminate();

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }

    info!(
        "Signaling connection {} finished (endpoint: {:?})",
        conn.id(),
        endpoint
    );
}

fn handle_frame(hub: &SignalingHub, conn: &Arc<Connection>, data: &[u8]) {
    match Message::from_slice(data) {
        Ok(message) => hub.router.route(conn, message),
        Err(CodecError::Invalid { kind, reason }) => {
            hub.router.reject_invalid(conn, &kind, &reason);
        }
        Err(e) => {
            warn!("Dropping frame from connection {}: {}", conn.id(), e);
        }
    }
}
