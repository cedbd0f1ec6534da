//! Session orchestrator
//!
//! One task owns the session and consumes a single event queue fed by:
//!
//! - user commands from [`OrchestratorHandle`]
//! - the dial task and the signaling receive loop
//! - the application heartbeat timer
//! - peer-connection callbacks via [`PeerEventSink`]
//!
//! Every non-command event carries the generation of the session or peer that
//! produced it. Tearing a session down bumps the generation, so anything still
//! in flight from the old one is discarded when it arrives.
//!
//! ```text
//! disconnected -> connecting -> registered -> selecting-host -> connected
//!       ^______________________ error / disconnect ______________|
//! ```

use super::peer::{PeerConnectionState, PeerConnector, PeerEvent, PeerEventSink, PeerSession};
use super::{ConnectionState, SessionError, SessionNotification};
use crate::config::ClientConfig;
use crate::input::InputEvent;
use crate::protocol::{HostInfo, IceCandidate, Message, MessageType, Payload, Role, SessionDescription};
use crate::transport::{SignalingChannel, SignalingDialer, TransportError};
use bytes::Bytes;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug)]
pub(crate) enum Command {
    Connect(String),
    SelectHost(String),
    RefreshHosts,
    SendInput(InputEvent),
    Disconnect,
    Shutdown,
}

#[derive(Debug)]
pub(crate) enum Event {
    Command(Command),
    Dialed {
        generation: u64,
        result: Result<SignalingChannel, TransportError>,
    },
    Signal {
        generation: u64,
        item: Result<Message, TransportError>,
    },
    Heartbeat {
        generation: u64,
    },
    Peer {
        generation: u64,
        event: PeerEvent,
    },
}

/// Cloneable handle to a running orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    events: mpsc::UnboundedSender<Event>,
    state: watch::Receiver<ConnectionState>,
    controller_id: Arc<str>,
}

impl OrchestratorHandle {
    fn command(&self, command: Command) -> Result<(), SessionError> {
        self.events
            .send(Event::Command(command))
            .map_err(|_| SessionError::Stopped)
    }

    /// Open the signaling transport and register. No-op unless disconnected.
    pub fn connect(&self, url: impl Into<String>) -> Result<(), SessionError> {
        self.command(Command::Connect(url.into()))
    }

    /// Start negotiating with `host_id`. Only honored while selecting a host.
    pub fn select_host(&self, host_id: impl Into<String>) -> Result<(), SessionError> {
        self.command(Command::SelectHost(host_id.into()))
    }

    /// Ask the relay for the current roster again
    pub fn refresh_hosts(&self) -> Result<(), SessionError> {
        self.command(Command::RefreshHosts)
    }

    /// Forward an input event over the peer's input channel
    pub fn send_input(&self, event: InputEvent) -> Result<(), SessionError> {
        self.command(Command::SendInput(event))
    }

    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.command(Command::Disconnect)
    }

    /// Tear down and stop the orchestrator task
    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.command(Command::Shutdown)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Resolve once the state equals `target`
    pub async fn wait_for(&self, target: ConnectionState) -> Result<(), SessionError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::Stopped)
    }

    pub fn controller_id(&self) -> &str {
        &self.controller_id
    }
}

/// Start an orchestrator task
pub fn spawn(
    config: &ClientConfig,
    dialer: Arc<dyn SignalingDialer>,
    connector: Arc<dyn PeerConnector>,
) -> (
    OrchestratorHandle,
    mpsc::UnboundedReceiver<SessionNotification>,
    JoinHandle<()>,
) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let controller_id = config.resolve_controller_id();

    let orchestrator = Orchestrator {
        controller_id: controller_id.clone(),
        ping_interval: config.ping_interval(),
        dialer,
        connector,
        events: events_tx.downgrade(),
        state: state_tx,
        notifications: notify_tx,
        session: None,
        next_generation: 1,
    };
    let task = tokio::spawn(orchestrator.run(events_rx));

    let handle = OrchestratorHandle {
        events: events_tx,
        state: state_rx,
        controller_id: controller_id.into(),
    };
    (handle, notify_rx, task)
}

struct ActivePeer {
    generation: u64,
    session: Box<dyn PeerSession>,
    /// Offer sent and no answer applied yet
    awaiting_answer: bool,
}

/// One connection attempt; never reused
struct Session {
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    tasks: Vec<JoinHandle<()>>,
    roster: Vec<HostInfo>,
    target: Option<String>,
    peer: Option<ActivePeer>,
}

impl Session {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            outbound: None,
            tasks: Vec::new(),
            roster: Vec::new(),
            target: None,
            peer: None,
        }
    }

    fn send(&self, message: Message) -> Result<(), SessionError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound.send(message).map_err(|_| TransportError::Closed)?;
        Ok(())
    }

    fn is_target(&self, id: Option<&str>) -> bool {
        matches!((self.target.as_deref(), id), (Some(target), Some(id)) if target == id)
    }
}

struct Orchestrator {
    controller_id: String,
    ping_interval: Duration,
    dialer: Arc<dyn SignalingDialer>,
    connector: Arc<dyn PeerConnector>,
    events: mpsc::WeakUnboundedSender<Event>,
    state: watch::Sender<ConnectionState>,
    notifications: mpsc::UnboundedSender<SessionNotification>,
    session: Option<Session>,
    next_generation: u64,
}

impl Orchestrator {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        info!("Session orchestrator started as {}", self.controller_id);
        while let Some(event) = events.recv().await {
            match event {
                Event::Command(Command::Shutdown) => break,
                Event::Command(command) => self.handle_command(command).await,
                Event::Dialed { generation, result } => self.handle_dialed(generation, result).await,
                Event::Signal { generation, item } => {
                    if self.is_current(generation) {
                        self.handle_signal(item).await;
                    } else {
                        debug!("Discarding signaling event from generation {}", generation);
                    }
                }
                Event::Heartbeat { generation } => {
                    if let Some(session) = self.session.as_ref().filter(|s| s.generation == generation) {
                        if let Err(e) = session.send(Message::ping()) {
                            debug!("Heartbeat ping not sent: {}", e);
                        }
                    }
                }
                Event::Peer { generation, event } => self.handle_peer_event(generation, event).await,
            }
        }
        self.teardown(None).await;
        info!("Session orchestrator stopped");
    }

    fn next_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session
            .as_ref()
            .map_or(false, |session| session.generation == generation)
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        if self.current_state() != state {
            info!("Connection state: {} -> {}", self.current_state(), state);
            self.state.send_replace(state);
            self.notify(SessionNotification::StateChanged(state));
        }
    }

    fn notify(&self, notification: SessionNotification) {
        let _ = self.notifications.send(notification);
    }

    fn report(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.notify(SessionNotification::Error(message));
    }

    fn send(&self, message: Message) -> Result<(), SessionError> {
        match self.session.as_ref() {
            Some(session) => session.send(message),
            None => Err(SessionError::InvalidState(self.current_state())),
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(url) => self.connect(url),
            Command::SelectHost(host_id) => self.select_host(host_id).await,
            Command::RefreshHosts => match self.current_state() {
                ConnectionState::Registered | ConnectionState::SelectingHost | ConnectionState::Connected => {
                    if let Err(e) = self.send(Message::list_hosts()) {
                        self.report(format!("Failed to refresh hosts: {}", e));
                    }
                }
                state => debug!("Ignoring host refresh while {}", state),
            },
            Command::SendInput(event) => self.send_input(event).await,
            Command::Disconnect => {
                info!("Disconnect requested");
                self.teardown(None).await;
            }
            Command::Shutdown => {}
        }
    }

    fn connect(&mut self, url: String) {
        if self.current_state() != ConnectionState::Disconnected {
            debug!("Connect ignored while {}", self.current_state());
            return;
        }

        let generation = self.next_generation();
        let mut session = Session::new(generation);
        info!("Connecting to {} as {}", url, self.controller_id);

        let dialer = self.dialer.clone();
        let events = self.events.clone();
        session.tasks.push(tokio::spawn(async move {
            let result = dialer.dial(&url).await;
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(Event::Dialed { generation, result });
            }
        }));

        self.session = Some(session);
        self.set_state(ConnectionState::Connecting);
    }

    async fn handle_dialed(&mut self, generation: u64, result: Result<SignalingChannel, TransportError>) {
        if !self.is_current(generation) || self.current_state() != ConnectionState::Connecting {
            debug!("Discarding dial result from generation {}", generation);
            return;
        }

        let channel = match result {
            Ok(channel) => channel,
            Err(e) => {
                self.teardown(Some(format!("Failed to connect: {}", e))).await;
                return;
            }
        };

        let SignalingChannel { outbound, inbound } = channel;
        let receive_loop = spawn_receive_loop(generation, inbound, self.events.clone());
        let heartbeat = spawn_heartbeat(generation, self.ping_interval, self.events.clone());
        let register = Message::register(self.controller_id.clone(), Role::Controller);

        let sent = match self.session.as_mut() {
            Some(session) => {
                session.outbound = Some(outbound);
                session.tasks.push(receive_loop);
                session.tasks.push(heartbeat);
                session.send(register)
            }
            None => return,
        };
        if let Err(e) = sent {
            self.teardown(Some(format!("Failed to register: {}", e))).await;
        }
    }

    async fn handle_signal(&mut self, item: Result<Message, TransportError>) {
        let message = match item {
            Ok(message) => message,
            Err(e) => {
                debug!("Signaling transport ended: {}", e);
                self.teardown(Some("Connection lost".to_string())).await;
                return;
            }
        };

        match message.kind {
            MessageType::Registered => {
                if self.current_state() != ConnectionState::Connecting {
                    debug!("Unexpected registered message while {}", self.current_state());
                    return;
                }
                info!("Registered with signaling server");
                self.set_state(ConnectionState::Registered);
                if let Err(e) = self.send(Message::list_hosts()) {
                    self.report(format!("Failed to request hosts: {}", e));
                }
                self.set_state(ConnectionState::SelectingHost);
            }
            MessageType::Hosts | MessageType::HostsUpdated => {
                if let Some(list) = message.list {
                    self.update_roster(list).await;
                }
            }
            MessageType::Answer => self.handle_answer(message.from, message.payload).await,
            MessageType::IceCandidate => self.handle_remote_candidate(message.from, message.payload).await,
            MessageType::HostDisconnected => {
                let Some(host_id) = message.host_id else {
                    return;
                };
                let is_target = self
                    .session
                    .as_ref()
                    .map_or(false, |session| session.is_target(Some(&host_id)));
                if is_target {
                    info!("Host disconnected: {}", host_id);
                    self.teardown(Some("Host disconnected".to_string())).await;
                    return;
                }
                if let Some(session) = self.session.as_mut() {
                    session.roster.retain(|host| host.id != host_id);
                    let roster = session.roster.clone();
                    self.notify(SessionNotification::HostsUpdated(roster));
                }
            }
            MessageType::Error => {
                let text = message.text.unwrap_or_else(|| "Unknown error".to_string());
                self.report(format!("Signaling error: {}", text));
            }
            MessageType::Pong => debug!("Heartbeat acknowledged"),
            MessageType::Offer => {
                warn!("Ignoring offer from {:?}; controllers only initiate", message.from);
            }
            other => warn!("Unknown message type: {}", other),
        }
    }

    async fn update_roster(&mut self, list: Vec<HostInfo>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        info!("Received {} host(s)", list.len());
        session.roster = list.clone();

        // Target vanished while a session to it is live
        let vanished = match (&session.target, &session.peer) {
            (Some(target), Some(_)) => !list.iter().any(|host| &host.id == target),
            _ => false,
        };
        self.notify(SessionNotification::HostsUpdated(list));
        if vanished {
            info!("Target host left the roster");
            self.teardown(Some("Host disconnected".to_string())).await;
        }
    }

    async fn select_host(&mut self, host_id: String) {
        if self.current_state() != ConnectionState::SelectingHost {
            self.report(format!("Cannot select a host while {}", self.current_state()));
            return;
        }

        let generation = self.next_generation();
        let previous = match self.session.as_mut() {
            Some(session) => {
                session.target = Some(host_id.clone());
                session.peer.take()
            }
            None => return,
        };
        if let Some(previous) = previous {
            debug!("Replacing peer generation {}", previous.generation);
            previous.session.close().await;
        }

        let sink = PeerEventSink::new(generation, self.events.clone());
        let peer = match self.connector.connect(sink).await {
            Ok(peer) => peer,
            Err(e) => {
                self.clear_target();
                self.report(format!("Failed to create peer connection: {}", e));
                return;
            }
        };

        let offer = match peer.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                peer.close().await;
                self.clear_target();
                self.report(format!("Failed to create offer: {}", e));
                return;
            }
        };

        let sent = Payload::from_value(&offer)
            .map_err(SessionError::from)
            .and_then(|payload| self.send(Message::signal(MessageType::Offer, host_id.as_str(), payload)));
        if let Err(e) = sent {
            peer.close().await;
            self.clear_target();
            self.report(format!("Failed to send offer: {}", e));
            return;
        }
        info!("Offer sent to {}", host_id);

        if let Some(session) = self.session.as_mut() {
            session.peer = Some(ActivePeer {
                generation,
                session: peer,
                awaiting_answer: true,
            });
        }
    }

    fn clear_target(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.target = None;
        }
    }

    async fn handle_answer(&mut self, from: Option<String>, payload: Option<Payload>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.is_target(from.as_deref()) {
            debug!("Ignoring answer from {:?}", from);
            return;
        }
        let Some(peer) = session.peer.as_mut().filter(|peer| peer.awaiting_answer) else {
            debug!("Ignoring answer with no outstanding offer");
            return;
        };

        let answer = match payload {
            Some(payload) => payload.decode::<SessionDescription>().map_err(SessionError::from),
            None => Err(SessionError::Peer("answer without payload".into())),
        };
        let result = match answer {
            Ok(answer) => peer.session.apply_answer(answer).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                peer.awaiting_answer = false;
                info!("Answer applied from {:?}", from);
            }
            Err(e) => self.report(format!("Failed to apply answer: {}", e)),
        }
    }

    async fn handle_remote_candidate(&mut self, from: Option<String>, payload: Option<Payload>) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.is_target(from.as_deref()) {
            debug!("Ignoring ICE candidate from {:?}", from);
            return;
        }
        let Some(peer) = session.peer.as_ref() else {
            self.report(format!("Failed to add ICE candidate: {}", SessionError::NoPeer));
            return;
        };

        let candidate = match payload {
            Some(payload) => payload.decode::<IceCandidate>().map_err(SessionError::from),
            None => Err(SessionError::Peer("candidate without payload".into())),
        };
        let result = match candidate {
            Ok(candidate) => peer.session.add_ice_candidate(candidate).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.report(format!("Failed to add ICE candidate: {}", e));
        }
    }

    async fn handle_peer_event(&mut self, generation: u64, event: PeerEvent) {
        let current = self
            .session
            .as_ref()
            .and_then(|session| session.peer.as_ref())
            .map_or(false, |peer| peer.generation == generation);
        if !current {
            debug!("Discarding peer event from generation {}", generation);
            return;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let target = self.session.as_ref().and_then(|session| session.target.clone());
                let Some(target) = target else {
                    return;
                };
                let sent = Payload::from_value(&candidate)
                    .map_err(SessionError::from)
                    .and_then(|payload| self.send(Message::signal(MessageType::IceCandidate, target, payload)));
                if let Err(e) = sent {
                    debug!("Local ICE candidate not sent: {}", e);
                }
            }
            PeerEvent::StateChanged(PeerConnectionState::Connected) => {
                if self.current_state() == ConnectionState::SelectingHost {
                    info!("Peer connection established");
                    self.set_state(ConnectionState::Connected);
                }
            }
            PeerEvent::StateChanged(PeerConnectionState::Failed) => {
                self.teardown(Some("Peer connection failed".to_string())).await;
            }
            PeerEvent::StateChanged(PeerConnectionState::Disconnected) => {
                self.teardown(Some("Peer connection disconnected".to_string())).await;
            }
            PeerEvent::StateChanged(state) => debug!("Peer connection state {:?}", state),
            PeerEvent::DataChannelOpen(label) => {
                info!("Data channel opened: {}", label);
                self.notify(SessionNotification::DataChannelOpen(label));
            }
            PeerEvent::Frame(data) => self.notify(SessionNotification::Frame(data)),
        }
    }

    async fn send_input(&mut self, event: InputEvent) {
        if self.current_state() != ConnectionState::Connected {
            self.report(format!("Cannot send input while {}", self.current_state()));
            return;
        }
        let Some(peer) = self.session.as_ref().and_then(|session| session.peer.as_ref()) else {
            self.report(format!("Failed to send input: {}", SessionError::NoPeer));
            return;
        };
        let result = match event.to_json() {
            Ok(json) => peer.session.send_input(Bytes::from(json)).await,
            Err(e) => Err(SessionError::Peer(e.to_string())),
        };
        if let Err(e) = result {
            self.report(format!("Failed to send input: {}", e));
        }
    }

    /// Full teardown back to disconnected. The error, if any, is reported
    /// before the state change.
    async fn teardown(&mut self, error: Option<String>) {
        if let Some(session) = self.session.take() {
            debug!("Tearing down session generation {}", session.generation);
            if let Some(peer) = session.peer {
                peer.session.close().await;
            }
            for task in session.tasks {
                task.abort();
            }
            // Dropping the outbound sender closes the socket
            drop(session.outbound);
        }
        if let Some(error) = error {
            self.report(error);
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

fn spawn_receive_loop(
    generation: u64,
    mut inbound: mpsc::UnboundedReceiver<Result<Message, TransportError>>,
    events: mpsc::WeakUnboundedSender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let item = inbound.recv().await.unwrap_or(Err(TransportError::Closed));
            let last = item.is_err();
            let Some(tx) = events.upgrade() else {
                return;
            };
            if tx.send(Event::Signal { generation, item }).is_err() || last {
                return;
            }
        }
    })
}

fn spawn_heartbeat(
    generation: u64,
    period: Duration,
    events: mpsc::WeakUnboundedSender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let Some(tx) = events.upgrade() else {
                return;
            };
            if tx.send(Event::Heartbeat { generation }).is_err() {
                return;
            }
        }
    })
}
