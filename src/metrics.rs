//! Prometheus metrics for the relay
//!
//! Each hub owns its own `Registry` so several servers can run in one process
//! (tests do).

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

pub struct RelayMetrics {
    registry: Registry,
    /// Open WebSocket connections
    pub connections: IntGauge,
    /// Registered endpoints
    pub endpoints: IntGauge,
    /// Inbound messages by type
    pub messages: IntCounterVec,
    /// Negotiation messages delivered by type
    pub relayed: IntCounterVec,
    /// Error replies by reason
    pub errors: IntCounterVec,
    /// Broadcast messages sent by type
    pub broadcasts: IntCounterVec,
    /// Connections closed by the liveness sweep
    pub evictions: IntCounter,
}

impl RelayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("airmac".to_string()), None)?;
        Ok(Self {
            connections: register_int_gauge_with_registry!(
                "signaling_connections",
                "Open signaling WebSocket connections",
                registry
            )?,
            endpoints: register_int_gauge_with_registry!(
                "signaling_endpoints",
                "Registered signaling endpoints",
                registry
            )?,
            messages: register_int_counter_vec_with_registry!(
                "signaling_messages_total",
                "Inbound signaling messages",
                &["type"],
                registry
            )?,
            relayed: register_int_counter_vec_with_registry!(
                "signaling_relayed_total",
                "Negotiation messages delivered to a target",
                &["type"],
                registry
            )?,
            errors: register_int_counter_vec_with_registry!(
                "signaling_errors_total",
                "Error replies sent to endpoints",
                &["reason"],
                registry
            )?,
            broadcasts: register_int_counter_vec_with_registry!(
                "signaling_broadcasts_total",
                "Presence broadcast messages sent",
                &["type"],
                registry
            )?,
            evictions: register_int_counter_with_registry!(
                "signaling_evictions_total",
                "Connections closed after a missed liveness probe",
                registry
            )?,
            registry,
        })
    }

    /// Prometheus text exposition
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_series() {
        let metrics = RelayMetrics::new().unwrap();
        metrics.connections.inc();
        metrics.relayed.with_label_values(&["offer"]).inc();
        metrics.errors.with_label_values(&["unknown-target"]).inc_by(2);

        let text = metrics.render().unwrap();
        assert!(text.contains("airmac_signaling_connections 1"));
        assert!(text.contains(r#"airmac_signaling_relayed_total{type="offer"} 1"#));
        assert!(text.contains(r#"airmac_signaling_errors_total{reason="unknown-target"} 2"#));
    }

    #[test]
    fn instances_are_independent() {
        let a = RelayMetrics::new().unwrap();
        let b = RelayMetrics::new().unwrap();
        a.evictions.inc();
        assert_eq!(a.evictions.get(), 1);
        assert_eq!(b.evictions.get(), 0);
    }
}
