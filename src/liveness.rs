//! Liveness monitor
//!
//! Every open connection, registered or not, is probed once per interval with a
//! transport-level ping. A connection that produced no frame and no pong since
//! the previous sweep is terminated and handed to the router's disconnect path.

use crate::metrics::RelayMetrics;
use crate::router::SignalingRouter;
use crate::transport::{Connection, ConnectionId};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct LivenessMonitor {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    interval: Duration,
    metrics: Arc<RelayMetrics>,
}

impl LivenessMonitor {
    pub fn new(interval: Duration, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            interval,
            metrics,
        }
    }

    pub fn track(&self, connection: Arc<Connection>) {
        self.connections.write().insert(connection.id(), connection);
    }

    pub fn untrack(&self, id: ConnectionId) {
        self.connections.write().remove(&id);
    }

    /// Open connections being probed
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One probe cycle. Returns the connections that were terminated.
    pub fn sweep(&self) -> Vec<Arc<Connection>> {
        let snapshot: Vec<Arc<Connection>> = self.connections.read().values().cloned().collect();

        let mut evicted = Vec::new();
        for connection in snapshot {
            if connection.is_terminated() {
                self.untrack(connection.id());
                continue;
            }
            if !connection.take_alive() {
                warn!(
                    "Connection {} ({}) missed a liveness probe, terminating",
                    connection.id(),
                    connection.endpoint_id().as_deref().unwrap_or(connection.remote())
                );
                connection.terminate();
                self.untrack(connection.id());
                self.metrics.evictions.inc();
                evicted.push(connection);
            } else if let Err(e) = connection.send_ping() {
                debug!("Ping to connection {} failed: {}", connection.id(), e);
            }
        }
        evicted
    }

    /// Terminate every tracked connection (server shutdown)
    pub fn close_all(&self) -> usize {
        let connections: Vec<Arc<Connection>> =
            self.connections.write().drain().map(|(_, conn)| conn).collect();
        for connection in &connections {
            connection.terminate();
        }
        connections.len()
    }

    /// Sweep on every interval tick until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, router: Arc<SignalingRouter>, mut shutdown: watch::Receiver<bool>) {
        info!("Liveness monitor running every {:?}", self.interval);
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for connection in self.sweep() {
                        router.disconnect(&connection);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Liveness monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, Role};
    use crate::registry::PresenceRegistry;
    use crate::transport::connection::{drain, drain_messages};
    use crate::transport::Outbound;

    fn setup() -> (Arc<LivenessMonitor>, Arc<SignalingRouter>) {
        let metrics = Arc::new(RelayMetrics::new().unwrap());
        let registry = Arc::new(PresenceRegistry::new("host-"));
        let router = Arc::new(SignalingRouter::new(registry, metrics.clone()));
        let monitor = Arc::new(LivenessMonitor::new(Duration::from_secs(30), metrics));
        (monitor, router)
    }

    #[test]
    fn responsive_connection_is_pinged_not_evicted() {
        let (monitor, _router) = setup();
        let (conn, mut rx) = Connection::new("a");
        monitor.track(conn.clone());

        assert!(monitor.sweep().is_empty());
        assert_eq!(drain(&mut rx), vec![Outbound::Ping]);

        conn.mark_alive();
        assert!(monitor.sweep().is_empty());
        assert!(conn.is_open());
        assert_eq!(monitor.len(), 1);
    }

    #[test]
    fn silent_host_evicted_after_two_cycles_with_one_broadcast() {
        let (monitor, router) = setup();
        let (host, _host_rx) = Connection::new("host");
        let (controller, mut controller_rx) = Connection::new("controller");
        monitor.track(host.clone());
        monitor.track(controller.clone());
        router.route(&host, Message::register("host-a", Role::Host));
        router.route(&controller, Message::register("controller-1", Role::Controller));
        drain(&mut controller_rx);

        // First cycle clears the flag, second finds it still clear
        for connection in monitor.sweep() {
            router.disconnect(&connection);
        }
        controller.mark_alive();
        let evicted = monitor.sweep();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id(), host.id());
        for connection in &evicted {
            router.disconnect(connection);
        }
        // Socket task tearing down afterwards is a no-op
        router.disconnect(&host);

        assert!(host.is_terminated());
        assert!(router.registry().lookup("host-a").is_err());
        let received = drain_messages(&mut controller_rx);
        assert_eq!(received, vec![Message::host_disconnected("host-a")]);
    }

    #[test]
    fn close_all_terminates_everything() {
        let (monitor, _router) = setup();
        let (a, _ra) = Connection::new("a");
        let (b, _rb) = Connection::new("b");
        monitor.track(a.clone());
        monitor.track(b.clone());
        assert_eq!(monitor.close_all(), 2);
        assert!(a.is_terminated() && b.is_terminated());
        assert!(monitor.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_evicts_on_interval_and_stops_on_shutdown() {
        let (monitor, router) = setup();
        let (conn, _rx) = Connection::new("a");
        monitor.track(conn.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(monitor.clone().run(router, shutdown_rx));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(conn.is_terminated());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
