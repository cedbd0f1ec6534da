//! Server-side connection handle
//!
//! One `Connection` exists per accepted WebSocket. Outbound frames go through
//! an unbounded queue drained by the connection's writer task, so any task may
//! push to any endpoint without holding a socket.

use super::TransportError;
use crate::protocol::{Message, Role};
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Frame queued for the writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encoded signaling message
    Text(String),
    /// Transport-level liveness probe
    Ping,
    /// Close the socket and stop writing
    Close,
}

pub struct Connection {
    id: ConnectionId,
    remote: String,
    tx: mpsc::UnboundedSender<Outbound>,
    alive: AtomicBool,
    terminated: AtomicBool,
    shutdown: Notify,
    /// Endpoint id and declared role once `register` succeeded
    endpoint: Mutex<Option<(String, Role)>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("endpoint", &*self.endpoint.lock())
            .field("open", &self.is_open())
            .finish()
    }
}

impl Connection {
    /// Create a connection handle and the queue its writer task drains
    pub fn new(remote: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            remote: remote.into(),
            tx,
            alive: AtomicBool::new(true),
            terminated: AtomicBool::new(false),
            shutdown: Notify::new(),
            endpoint: Mutex::new(None),
        });
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Writable: not terminated and the writer is still draining
    pub fn is_open(&self) -> bool {
        !self.terminated.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Encode and queue a message
    pub fn send(&self, message: &Message) -> Result<(), TransportError> {
        let text = message.to_json()?;
        self.send_text(text)
    }

    /// Queue pre-encoded text (broadcasts encode once)
    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.tx.send(Outbound::Text(text)).map_err(|_| TransportError::Closed)
    }

    /// Queue a transport-level ping frame
    pub fn send_ping(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.tx.send(Outbound::Ping).map_err(|_| TransportError::Closed)
    }

    /// Record inbound traffic (any frame or pong)
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Clear the alive flag, returning whether it was set
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Force the connection closed. Idempotent.
    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            debug!("Terminating connection {} ({})", self.id, self.remote);
            let _ = self.tx.send(Outbound::Close);
            self.shutdown.notify_one();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Resolves once `terminate` was called
    pub async fn terminated(&self) {
        if self.is_terminated() {
            return;
        }
        self.shutdown.notified().await;
    }

    pub fn endpoint_id(&self) -> Option<String> {
        self.endpoint.lock().as_ref().map(|(id, _)| id.clone())
    }

    pub fn bind_endpoint(&self, id: String, role: Role) -> Option<(String, Role)> {
        self.endpoint.lock().replace((id, role))
    }

    /// Detach the endpoint binding; only the first caller gets it
    pub fn take_endpoint(&self) -> Option<(String, Role)> {
        self.endpoint.lock().take()
    }
}

#[cfg(test)]
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

/// Decoded signaling messages among the queued frames
#[cfg(test)]
pub(crate) fn drain_messages(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Message> {
    drain(rx)
        .into_iter()
        .filter_map(|frame| match frame {
            Outbound::Text(text) => Message::from_json(&text).ok(),
            _ => None,
        })
        .collect()
}
