//! Peer-connection collaborator
//!
//! The orchestrator never touches a WebRTC stack directly. It asks a
//! `PeerConnector` for a `PeerSession` and receives the session's callbacks as
//! events through a `PeerEventSink`.

use super::orchestrator::Event;
use super::SessionError;
use crate::protocol::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Callback from a peer session
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Locally gathered candidate to trickle to the host
    LocalCandidate(IceCandidate),
    StateChanged(PeerConnectionState),
    /// Data channel open, by label
    DataChannelOpen(String),
    /// Binary message from the host
    Frame(Bytes),
}

/// Delivers peer callbacks to the orchestrator, tagged with the generation of
/// the peer that produced them. Does not keep the orchestrator alive.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    generation: u64,
    tx: mpsc::WeakUnboundedSender<Event>,
}

impl PeerEventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::WeakUnboundedSender<Event>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Post an event; returns false once the orchestrator is gone
    pub fn emit(&self, event: PeerEvent) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx
                .send(Event::Peer {
                    generation: self.generation,
                    event,
                })
                .is_ok(),
            None => false,
        }
    }
}

/// Creates peer sessions
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, sink: PeerEventSink) -> Result<Box<dyn PeerSession>, SessionError>;
}

/// One peer connection, controller side
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Create an offer and install it as the local description
    async fn create_offer(&self) -> Result<SessionDescription, SessionError>;

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), SessionError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError>;

    /// Send an encoded input event on the input data channel
    async fn send_input(&self, data: Bytes) -> Result<(), SessionError>;

    async fn close(&self);
}
