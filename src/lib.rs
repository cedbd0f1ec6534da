//! airmac-signaling - signaling relay for AirMac remote control
//!
//! Hosts and controllers register over WebSocket; the relay keeps a presence
//! registry, forwards offer/answer/ICE between them and evicts silent peers.
//! The `client` module drives the controller side of a session.

pub mod args;
pub mod client;
pub mod config;
pub mod input;
pub mod liveness;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod transport;
pub mod web;

// Re-exports
pub use client::{ConnectionState, OrchestratorHandle, SessionError, SessionNotification};
pub use config::Config;
pub use input::InputEvent;
pub use protocol::{HostInfo, Message, MessageType, Role};
pub use registry::PresenceRegistry;
pub use router::SignalingRouter;
pub use web::SignalingHub;
