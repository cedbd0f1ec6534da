//! Signaling wire protocol
//!
//! JSON envelope exchanged between endpoints and the relay, plus typed
//! views over the opaque negotiation payloads.

pub mod message;
pub mod payload;

pub use message::{HostInfo, Message, MessageType, Payload, Role};
pub use payload::{IceCandidate, SdpType, SessionDescription};

use std::error::Error;
use std::fmt;

/// Wire codec errors
#[derive(Debug)]
pub enum CodecError {
    /// Frame is not a JSON object carrying a `type` tag
    Malformed(String),
    /// Frame carries a recognizable `type` but the remaining fields are invalid
    Invalid { kind: MessageType, reason: String },
    /// Serialization failed
    Encode(String),
    /// Payload does not have the expected shape
    Payload(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Malformed(msg) => write!(f, "Malformed frame: {}", msg),
            CodecError::Invalid { kind, reason } => write!(f, "Invalid {} message: {}", kind, reason),
            CodecError::Encode(msg) => write!(f, "Encode error: {}", msg),
            CodecError::Payload(msg) => write!(f, "Payload error: {}", msg),
        }
    }
}

impl Error for CodecError {}

/// Milliseconds since the Unix epoch, as carried in `timestamp`.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
