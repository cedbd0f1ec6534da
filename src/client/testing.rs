//! In-memory dialer and peer connector for orchestrator tests

use super::peer::{PeerConnector, PeerEventSink, PeerSession};
use super::{SessionError, SessionNotification};
use crate::protocol::{IceCandidate, Message, SessionDescription};
use crate::transport::{SignalingChannel, SignalingDialer, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

/// Test side of one dialed link
pub struct FakeLink {
    /// What the orchestrator sent
    pub sent: mpsc::UnboundedReceiver<Message>,
    /// Feed messages (or a transport error) to the orchestrator
    pub incoming: mpsc::UnboundedSender<Result<Message, TransportError>>,
}

impl FakeLink {
    pub async fn next_sent(&mut self) -> Message {
        tokio::time::timeout(WAIT, self.sent.recv())
            .await
            .expect("orchestrator sent a message")
            .expect("link open")
    }

    pub fn deliver(&self, message: Message) {
        self.incoming.send(Ok(message)).expect("receive loop alive");
    }

    /// True once the orchestrator dropped its outbound sender
    pub async fn closed(&mut self) -> bool {
        tokio::time::timeout(WAIT, async {
            while self.sent.recv().await.is_some() {}
        })
        .await
        .is_ok()
    }
}

pub struct FakeDialer {
    links: mpsc::UnboundedSender<FakeLink>,
    dials: AtomicUsize,
    fail: AtomicBool,
}

impl FakeDialer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeLink>) {
        let (links, rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            links,
            dials: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        });
        (dialer, rx)
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn fail_dials(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SignalingDialer for FakeDialer {
    async fn dial(&self, _url: &str) -> Result<SignalingChannel, TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        let (outbound, sent) = mpsc::unbounded_channel();
        let (incoming, inbound) = mpsc::unbounded_channel();
        let _ = self.links.send(FakeLink { sent, incoming });
        Ok(SignalingChannel { outbound, inbound })
    }
}

/// Calls made on fake peers
#[derive(Debug, Clone, PartialEq)]
pub enum PeerCall {
    CreateOffer,
    ApplyAnswer(String),
    AddCandidate(String),
    SendInput(Bytes),
    Close,
}

#[derive(Default)]
pub struct FakePeerConnector {
    sinks: Mutex<Vec<PeerEventSink>>,
    calls: Arc<Mutex<Vec<PeerCall>>>,
    fail_offer: AtomicBool,
}

impl FakePeerConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sink of the most recently created peer
    pub fn last_sink(&self) -> PeerEventSink {
        self.sinks.lock().last().cloned().expect("a peer was created")
    }

    pub fn sink(&self, index: usize) -> PeerEventSink {
        self.sinks.lock()[index].clone()
    }

    pub fn peers(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().clone()
    }

    pub fn fail_offers(&self, fail: bool) {
        self.fail_offer.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerConnector for FakePeerConnector {
    async fn connect(&self, sink: PeerEventSink) -> Result<Box<dyn PeerSession>, SessionError> {
        self.sinks.lock().push(sink);
        Ok(Box::new(FakePeer {
            calls: self.calls.clone(),
            fail_offer: self.fail_offer.load(Ordering::SeqCst),
        }))
    }
}

struct FakePeer {
    calls: Arc<Mutex<Vec<PeerCall>>>,
    fail_offer: bool,
}

#[async_trait]
impl PeerSession for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription, SessionError> {
        self.calls.lock().push(PeerCall::CreateOffer);
        if self.fail_offer {
            return Err(SessionError::Peer("no codecs".to_string()));
        }
        Ok(SessionDescription::offer("v=0\r\n"))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), SessionError> {
        self.calls.lock().push(PeerCall::ApplyAnswer(answer.sdp));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError> {
        self.calls.lock().push(PeerCall::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn send_input(&self, data: Bytes) -> Result<(), SessionError> {
        self.calls.lock().push(PeerCall::SendInput(data));
        Ok(())
    }

    async fn close(&self) {
        self.calls.lock().push(PeerCall::Close);
    }
}

/// Wait for the first notification matching `predicate`, skipping others
pub async fn expect_notification<F>(
    rx: &mut mpsc::UnboundedReceiver<SessionNotification>,
    mut predicate: F,
) -> SessionNotification
where
    F: FnMut(&SessionNotification) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let notification = rx.recv().await.expect("orchestrator running");
            if predicate(&notification) {
                return notification;
            }
        }
    })
    .await
    .expect("notification within timeout")
}
