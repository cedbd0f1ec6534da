//! Shared state for the signaling server
//!
//! One `SignalingHub` per listening server, handed to every axum handler and
//! connection task.

use crate::config::Config;
use crate::liveness::LivenessMonitor;
use crate::metrics::RelayMetrics;
use crate::registry::PresenceRegistry;
use crate::router::SignalingRouter;
use log::info;
use std::sync::Arc;
use std::time::Duration;

pub struct SignalingHub {
    /// Configuration
    pub config: Arc<Config>,

    /// Registered endpoints
    pub registry: Arc<PresenceRegistry>,

    /// Message dispatch and disconnect side effects
    pub router: Arc<SignalingRouter>,

    /// Open connections being probed
    pub liveness: Arc<LivenessMonitor>,

    /// Prometheus series
    pub metrics: Arc<RelayMetrics>,

    /// Server start time
    pub start_time: std::time::Instant,
}

impl SignalingHub {
    pub fn new(config: Config) -> Result<Self, prometheus::Error> {
        let metrics = Arc::new(RelayMetrics::new()?);
        let registry = Arc::new(PresenceRegistry::new(config.signaling.host_id_prefix.clone()));
        let router = Arc::new(SignalingRouter::new(registry.clone(), metrics.clone()));
        let liveness = Arc::new(LivenessMonitor::new(config.liveness_interval(), metrics.clone()));

        Ok(Self {
            config: Arc::new(config),
            registry,
            router,
            liveness,
            metrics,
            start_time: std::time::Instant::now(),
        })
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Registered endpoints
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Terminate every open connection
    pub fn close_all(&self) {
        let closed = self.liveness.close_all();
        info!("Closed {} signaling connections", closed);
    }
}
