//! HTTP server for signaling, health checks and metrics

pub mod shared;
pub use shared::SignalingHub;

pub mod http_server;
pub use http_server::{build_router, run_signaling_server, serve};
