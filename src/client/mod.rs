//! Controller-side session orchestration
//!
//! A controller connects to the relay, registers, picks a host from the roster
//! and drives offer/answer/ICE until the peer connection reports connected.
//! All of that runs on one actor task; see [`orchestrator`].

pub mod orchestrator;
pub mod peer;
#[cfg(test)]
pub(crate) mod testing;
#[cfg(feature = "webrtc-peer")]
pub mod webrtc_peer;

pub use orchestrator::{spawn, OrchestratorHandle};
pub use peer::{PeerConnectionState, PeerConnector, PeerEvent, PeerEventSink, PeerSession};

use crate::protocol::{CodecError, HostInfo};
use crate::transport::TransportError;
use bytes::Bytes;
use std::error::Error;
use std::fmt;

/// Session errors
#[derive(Debug)]
pub enum SessionError {
    /// Operation needs a state the session is not in
    InvalidState(ConnectionState),
    /// No peer connection to apply to
    NoPeer,
    /// Signaling transport failure
    Transport(TransportError),
    /// Encode/decode failure
    Codec(CodecError),
    /// Peer connection library failure
    Peer(String),
    /// Orchestrator task is gone
    Stopped,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidState(state) => write!(f, "Not allowed while {}", state),
            SessionError::NoPeer => write!(f, "No peer connection"),
            SessionError::Transport(e) => write!(f, "{}", e),
            SessionError::Codec(e) => write!(f, "{}", e),
            SessionError::Peer(msg) => write!(f, "Peer connection error: {}", msg),
            SessionError::Stopped => write!(f, "Session orchestrator stopped"),
        }
    }
}

impl Error for SessionError {}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::Transport(e)
    }
}

impl From<CodecError> for SessionError {
    fn from(e: CodecError) -> Self {
        SessionError::Codec(e)
    }
}

/// Controller connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Registered,
    SelectingHost,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Registered => "registered",
            ConnectionState::SelectingHost => "selecting-host",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing notifications
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotification {
    StateChanged(ConnectionState),
    HostsUpdated(Vec<HostInfo>),
    /// Something the user should see; never changes state by itself
    Error(String),
    DataChannelOpen(String),
    /// Downstream frame from the host
    Frame(Bytes),
}
