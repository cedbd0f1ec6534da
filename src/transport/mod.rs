//! Transport layer for AirMac signaling
//!
//! Server-side WebSocket connections feeding the router, and the client-side
//! dialer the controller uses to reach the relay.

pub mod client;
pub mod connection;
pub mod signaling_server;

pub use client::{SignalingChannel, SignalingDialer, WebSocketDialer};
pub use connection::{Connection, ConnectionId, Outbound};
pub use signaling_server::handle_signaling_connection;

use crate::protocol::CodecError;
use std::error::Error;
use std::fmt;

/// Transport errors
#[derive(Debug)]
pub enum TransportError {
    /// Connection closed or closing
    Closed,
    /// Dial failed
    Connect(String),
    /// WebSocket protocol or I/O failure
    WebSocket(String),
    /// Message could not be encoded
    Codec(CodecError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => write!(f, "Connection closed"),
            TransportError::Connect(msg) => write!(f, "Connect failed: {}", msg),
            TransportError::WebSocket(msg) => write!(f, "WebSocket error: {}", msg),
            TransportError::Codec(e) => write!(f, "{}", e),
        }
    }
}

impl Error for TransportError {}

impl From<CodecError> for TransportError {
    fn from(e: CodecError) -> Self {
        TransportError::Codec(e)
    }
}
