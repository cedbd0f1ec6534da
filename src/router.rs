//! Signaling router
//!
//! Dispatches decoded messages from one connection: registration, roster
//! queries, negotiation relay, application ping. Also owns the disconnect
//! side effects shared by socket close and liveness eviction.

use crate::metrics::RelayMetrics;
use crate::protocol::{now_millis, Message, MessageType, Role};
use crate::registry::PresenceRegistry;
use crate::transport::Connection;
use log::{debug, info, warn};
use std::sync::Arc;

pub struct SignalingRouter {
    registry: Arc<PresenceRegistry>,
    metrics: Arc<RelayMetrics>,
}

impl SignalingRouter {
    pub fn new(registry: Arc<PresenceRegistry>, metrics: Arc<RelayMetrics>) -> Self {
        Self { registry, metrics }
    }

    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.registry
    }

    /// Handle one inbound message from `connection`
    pub fn route(&self, connection: &Arc<Connection>, message: Message) {
        self.metrics
            .messages
            .with_label_values(&[message_label(&message.kind)])
            .inc();

        let kind = message.kind.clone();
        match kind {
            MessageType::Register => self.handle_register(connection, message),
            MessageType::ListHosts => self.handle_list_hosts(connection),
            MessageType::Offer | MessageType::Answer | MessageType::IceCandidate => {
                self.handle_negotiation(connection, message)
            }
            MessageType::Ping => self.reply(connection, &Message::pong()),
            other => {
                warn!(
                    "Unknown message type {:?} from connection {} ({})",
                    other.as_str(),
                    connection.id(),
                    connection.remote()
                );
            }
        }
    }

    fn handle_register(&self, connection: &Arc<Connection>, message: Message) {
        let id = match message.id {
            Some(id) if !id.is_empty() => id,
            _ => {
                self.reply_error(connection, "missing-id", "Missing id");
                return;
            }
        };
        let role = message.role.unwrap_or_default();

        // Re-registering under a new id releases the old one first
        if let Some(previous) = connection.endpoint_id() {
            if previous != id {
                debug!("Connection {} switches id {} -> {}", connection.id(), previous, id);
                self.disconnect(connection);
            }
        }

        if let Some(replaced) = self.registry.register(&id, role, connection.clone()) {
            // Superseded socket keeps running but no longer speaks for `id`
            if replaced.connection.id() != connection.id() {
                replaced.connection.take_endpoint();
                debug!("Connection {} released {}", replaced.connection.id(), id);
            }
        }
        connection.bind_endpoint(id.clone(), role);
        self.metrics.endpoints.set(self.registry.len() as i64);
        info!(
            "Registered: {} as {} (connection {}, {} endpoints)",
            id,
            role,
            connection.id(),
            self.registry.len()
        );

        self.reply(connection, &Message::registered(id, now_millis()));

        if role == Role::Host {
            let roster = self.registry.list_by_role(Role::Host);
            self.broadcast_to_controllers(&Message::hosts_updated(roster));
        }
    }

    fn handle_list_hosts(&self, connection: &Arc<Connection>) {
        let roster = self.registry.list_by_role(Role::Host);
        self.reply(connection, &Message::hosts(roster));
    }

    fn handle_negotiation(&self, connection: &Arc<Connection>, message: Message) {
        let from = match connection.endpoint_id() {
            Some(id) => id,
            None => {
                self.reply_error(connection, "not-registered", "Not registered");
                return;
            }
        };

        let target = match message.target.as_deref() {
            Some(target) if !target.is_empty() => target,
            _ => {
                self.reply_error(connection, "unknown-target", "Target not specified");
                return;
            }
        };

        let endpoint = match self.registry.lookup(target) {
            Ok(endpoint) if endpoint.is_online() => endpoint,
            _ => {
                self.reply_error(
                    connection,
                    "unknown-target",
                    &format!("Target {} not found or not connected", target),
                );
                return;
            }
        };

        let relayed = Message::relayed(message.kind.clone(), from.as_str(), message.payload, now_millis());
        match endpoint.connection.send(&relayed) {
            Ok(()) => {
                self.metrics
                    .relayed
                    .with_label_values(&[message.kind.as_str()])
                    .inc();
                debug!("Relayed {} from {} to {}", message.kind, from, target);
            }
            Err(e) => {
                // Target closed between lookup and send
                debug!("Relay {} from {} to {} failed: {}", message.kind, from, target, e);
                self.reply_error(
                    connection,
                    "unknown-target",
                    &format!("Target {} not found or not connected", target),
                );
            }
        }
    }

    /// Disconnect side effects for `connection`. Safe to call more than once;
    /// only the first call for a given registration has any effect.
    pub fn disconnect(&self, connection: &Connection) {
        let Some((id, _role)) = connection.take_endpoint() else {
            return;
        };

        let removed = self.registry.unregister_connection(&id, connection.id());
        self.metrics.endpoints.set(self.registry.len() as i64);

        match removed {
            Some(endpoint) => {
                info!(
                    "Client disconnected: {} ({} remaining)",
                    id,
                    self.registry.len()
                );
                if endpoint.role == Role::Host {
                    self.broadcast_to_controllers(&Message::host_disconnected(id));
                }
            }
            None => debug!("Endpoint {} already replaced, nothing to remove", id),
        }
    }

    /// Send to every open non-host endpoint. Encodes once; the target set is
    /// snapshotted before sending.
    pub fn broadcast_to_controllers(&self, message: &Message) -> usize {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode {} broadcast: {}", message.kind, e);
                return 0;
            }
        };

        let recipients = self.registry.endpoints_by_role(Role::Controller);
        let mut sent = 0;
        for endpoint in recipients.iter().filter(|endpoint| endpoint.is_online()) {
            if endpoint.connection.send_text(text.clone()).is_ok() {
                sent += 1;
            }
        }
        self.metrics
            .broadcasts
            .with_label_values(&[message.kind.as_str()])
            .inc_by(sent as u64);
        debug!("Broadcast {} to {} endpoints", message.kind, sent);
        sent
    }

    fn reply(&self, connection: &Connection, message: &Message) {
        if let Err(e) = connection.send(message) {
            debug!("Reply {} to connection {} dropped: {}", message.kind, connection.id(), e);
        }
    }

    fn reply_error(&self, connection: &Connection, reason: &str, text: &str) {
        self.metrics.errors.with_label_values(&[reason]).inc();
        self.reply(connection, &Message::error(text));
    }

    /// Reply to a frame whose `type` was readable but whose fields were not.
    /// Unrecognized types are only logged.
    pub fn reject_invalid(&self, connection: &Connection, kind: &MessageType, reason: &str) {
        if let MessageType::Unknown(tag) = kind {
            warn!("Unknown message type {:?} from connection {}: {}", tag, connection.id(), reason);
            return;
        }
        warn!("Invalid {} message from connection {}: {}", kind, connection.id(), reason);
        self.reply_error(connection, "invalid", &format!("Invalid {} message", kind));
    }
}

/// Bounded label set for the message counter
fn message_label(kind: &MessageType) -> &str {
    match kind {
        MessageType::Unknown(_) => "unknown",
        other => other.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HostInfo, Payload};
    use crate::transport::connection::drain_messages;
    use crate::transport::Outbound;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Peer {
        conn: Arc<Connection>,
        rx: UnboundedReceiver<Outbound>,
    }

    impl Peer {
        fn new(name: &str) -> Self {
            let (conn, rx) = Connection::new(name);
            Self { conn, rx }
        }

        fn messages(&mut self) -> Vec<Message> {
            drain_messages(&mut self.rx)
        }
    }

    fn router() -> SignalingRouter {
        SignalingRouter::new(
            Arc::new(PresenceRegistry::new("host-")),
            Arc::new(RelayMetrics::new().unwrap()),
        )
    }

    fn registered(router: &SignalingRouter, id: &str, role: Role) -> Peer {
        let mut peer = Peer::new(id);
        router.route(&peer.conn, Message::register(id, role));
        peer.messages();
        peer
    }

    #[test]
    fn register_replies_with_id_and_timestamp() {
        let router = router();
        let mut peer = Peer::new("c");
        router.route(&peer.conn, Message::register("controller-1", Role::Controller));
        let replies = peer.messages();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind, MessageType::Registered);
        assert_eq!(replies[0].id.as_deref(), Some("controller-1"));
        assert!(replies[0].timestamp.is_some());
    }

    #[test]
    fn missing_role_defaults_to_controller() {
        let router = router();
        let peer = Peer::new("c");
        let message = Message::from_json(r#"{"type":"register","id":"controller-x"}"#).unwrap();
        router.route(&peer.conn, message);
        assert_eq!(router.registry().lookup("controller-x").unwrap().role, Role::Controller);
    }

    #[test]
    fn register_without_id_is_rejected() {
        let router = router();
        let mut peer = Peer::new("c");
        router.route(&peer.conn, Message::new(MessageType::Register));
        let replies = peer.messages();
        assert_eq!(replies, vec![Message::error("Missing id")]);
        assert!(router.registry().is_empty());
    }

    #[test]
    fn host_register_broadcasts_to_controllers_only() {
        let router = router();
        let mut c1 = registered(&router, "controller-1", Role::Controller);
        let mut c2 = registered(&router, "controller-2", Role::Controller);
        let mut existing_host = registered(&router, "host-old", Role::Host);
        c1.messages();
        c2.messages();

        let mut host = Peer::new("h");
        router.route(&host.conn, Message::register("host-new", Role::Host));

        let expected = Message::hosts_updated(vec![
            HostInfo::new("host-old", true),
            HostInfo::new("host-new", true),
        ]);
        assert_eq!(c1.messages(), vec![expected.clone()]);
        assert_eq!(c2.messages(), vec![expected]);
        assert!(existing_host.messages().is_empty());
        let host_replies = host.messages();
        assert_eq!(host_replies.len(), 1);
        assert_eq!(host_replies[0].kind, MessageType::Registered);
    }

    #[test]
    fn broadcast_skips_closed_controllers() {
        let router = router();
        let mut open = registered(&router, "controller-open", Role::Controller);
        let closed = registered(&router, "controller-closed", Role::Controller);
        drop(closed.rx);

        let _host = registered(&router, "host-a", Role::Host);
        assert_eq!(open.messages().len(), 1);
        assert_eq!(
            router.broadcast_to_controllers(&Message::host_disconnected("host-a")),
            1
        );
    }

    #[test]
    fn list_hosts_replies_to_sender_only() {
        let router = router();
        let _host = registered(&router, "host-a", Role::Host);
        let mut other = registered(&router, "controller-2", Role::Controller);
        let mut asker = registered(&router, "controller-1", Role::Controller);
        other.messages();

        router.route(&asker.conn, Message::list_hosts());
        assert_eq!(
            asker.messages(),
            vec![Message::hosts(vec![HostInfo::new("host-a", true)])]
        );
        assert!(other.messages().is_empty());
    }

    #[test]
    fn relays_offer_with_from_and_verbatim_payload() {
        let router = router();
        let mut host = registered(&router, "host-a", Role::Host);
        let mut controller = registered(&router, "controller-1", Role::Controller);

        let raw = r#"{"type":"offer","target":"host-a","payload":{"type":"offer","sdp":"v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\n" }}"#;
        router.route(&controller.conn, Message::from_json(raw).unwrap());

        let delivered = host.messages();
        assert_eq!(delivered.len(), 1);
        let relayed = &delivered[0];
        assert_eq!(relayed.kind, MessageType::Offer);
        assert_eq!(relayed.from.as_deref(), Some("controller-1"));
        assert_eq!(relayed.target, None);
        assert!(relayed.timestamp.is_some());
        assert_eq!(
            relayed.payload.as_ref().map(Payload::as_str),
            Some(r#"{"type":"offer","sdp":"v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\n" }"#)
        );
        assert!(controller.messages().is_empty());
    }

    #[test]
    fn unknown_target_yields_exactly_one_error() {
        let router = router();
        let mut host = registered(&router, "host-a", Role::Host);
        let mut controller = registered(&router, "controller-1", Role::Controller);

        let payload = Payload::from_json(r#"{"candidate":"c","sdpMLineIndex":0}"#).unwrap();
        router.route(
            &controller.conn,
            Message::signal(MessageType::IceCandidate, "host-missing", payload),
        );

        assert_eq!(
            controller.messages(),
            vec![Message::error("Target host-missing not found or not connected")]
        );
        assert!(host.messages().is_empty());
    }

    #[test]
    fn offline_target_is_not_delivered() {
        let router = router();
        let host = registered(&router, "host-a", Role::Host);
        let mut controller = registered(&router, "controller-1", Role::Controller);
        drop(host.rx);

        let payload = Payload::from_json(r#"{"type":"offer","sdp":""}"#).unwrap();
        router.route(&controller.conn, Message::signal(MessageType::Offer, "host-a", payload));
        let replies = controller.messages();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind, MessageType::Error);
    }

    #[test]
    fn negotiation_requires_registration() {
        let router = router();
        let _host = registered(&router, "host-a", Role::Host);
        let mut stranger = Peer::new("s");
        let payload = Payload::from_json("{}").unwrap();
        router.route(&stranger.conn, Message::signal(MessageType::Answer, "host-a", payload));
        assert_eq!(stranger.messages(), vec![Message::error("Not registered")]);
    }

    #[test]
    fn ping_replies_pong_and_unknown_is_dropped() {
        let router = router();
        let mut peer = Peer::new("p");
        router.route(&peer.conn, Message::ping());
        router.route(&peer.conn, Message::new(MessageType::Unknown("subscribe".into())));
        assert_eq!(peer.messages(), vec![Message::pong()]);
        assert!(router.registry().is_empty());
    }

    #[test]
    fn host_disconnect_broadcasts_once() {
        let router = router();
        let host = registered(&router, "host-a", Role::Host);
        let mut controller = registered(&router, "controller-1", Role::Controller);

        router.disconnect(&host.conn);
        router.disconnect(&host.conn);

        assert_eq!(controller.messages(), vec![Message::host_disconnected("host-a")]);
        assert!(router.registry().lookup("host-a").is_err());
    }

    #[test]
    fn controller_disconnect_is_silent() {
        let router = router();
        let mut other = registered(&router, "controller-2", Role::Controller);
        let leaving = registered(&router, "controller-1", Role::Controller);
        router.disconnect(&leaving.conn);
        assert!(other.messages().is_empty());
        assert_eq!(router.registry().len(), 1);
    }

    #[test]
    fn stale_connection_does_not_evict_replacement() {
        let router = router();
        let old = registered(&router, "host-a", Role::Host);
        let mut controller = registered(&router, "controller-1", Role::Controller);
        let _new = registered(&router, "host-a", Role::Host);
        controller.messages();

        router.disconnect(&old.conn);
        assert!(router.registry().lookup("host-a").is_ok());
        assert!(controller.messages().is_empty());
    }

    #[test]
    fn reregister_with_new_id_releases_old() {
        let router = router();
        let mut controller = registered(&router, "controller-1", Role::Controller);
        let mut host = registered(&router, "host-a", Role::Host);
        controller.messages();

        router.route(&host.conn, Message::register("host-b", Role::Host));
        host.messages();
        assert!(router.registry().lookup("host-a").is_err());
        assert_eq!(
            controller.messages(),
            vec![
                Message::host_disconnected("host-a"),
                Message::hosts_updated(vec![HostInfo::new("host-b", true)]),
            ]
        );
    }

    #[test]
    fn invalid_frames_get_error_reply() {
        let router = router();
        let mut peer = Peer::new("p");
        router.reject_invalid(&peer.conn, &MessageType::Register, "invalid type: integer");
        assert_eq!(peer.messages(), vec![Message::error("Invalid register message")]);
    }

    #[test]
    fn invalid_frame_of_unknown_type_gets_no_reply() {
        let router = router();
        let mut peer = Peer::new("p");
        router.reject_invalid(&peer.conn, &MessageType::Unknown("subscribe".into()), "invalid type: integer");
        assert!(peer.messages().is_empty());
    }

    #[test]
    fn superseded_connection_can_no_longer_relay() {
        let router = router();
        let mut old = registered(&router, "controller-1", Role::Controller);
        let mut host = registered(&router, "host-a", Role::Host);
        let _new = registered(&router, "controller-1", Role::Controller);
        old.messages();
        assert_eq!(old.conn.endpoint_id(), None);

        let payload = Payload::from_json(r#"{"type":"offer","sdp":""}"#).unwrap();
        router.route(&old.conn, Message::signal(MessageType::Offer, "host-a", payload));
        assert_eq!(old.messages(), vec![Message::error("Not registered")]);
        assert!(host.messages().is_empty());

        router.disconnect(&old.conn);
        assert!(router.registry().lookup("controller-1").is_ok());
    }
}
