//! HTTP server
//!
//! Serves the signaling WebSocket on `/` and `/ws`, plus health and metrics.

use crate::web::shared::SignalingHub;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::{error, info};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Build the axum router for a hub
pub fn build_router(hub: Arc<SignalingHub>) -> Router {
    Router::new()
        .route("/", get(signaling_handler))
        .route("/ws", get(signaling_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(hub)
}

/// Bind the configured address and serve until `shutdown` resolves
pub async fn run_signaling_server<F>(
    hub: Arc<SignalingHub>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = hub.config.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    info!("Signaling server listening on ws://{}", addr);
    info!("Health check available at http://{}/health", addr);
    serve(listener, hub, shutdown).await
}

/// Serve on an already-bound listener. Starts the liveness monitor and
/// closes every connection once `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    hub: Arc<SignalingHub>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    let monitor = tokio::spawn(hub.liveness.clone().run(hub.router.clone(), stop_rx));

    let app = build_router(hub.clone());
    let shutdown_hub = hub.clone();
    let result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutdown requested, closing signaling connections");
            let _ = stop_tx.send(true);
            shutdown_hub.close_all();
        })
        .await;

    if let Err(e) = monitor.await {
        error!("Liveness monitor task failed: {}", e);
    }

    result.map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
}

async fn signaling_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<SignalingHub>>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        crate::transport::handle_signaling_connection(socket, addr.to_string(), hub).await;
    })
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    clients: usize,
    uptime: f64,
}

/// Health check handler
async fn health_handler(State(hub): State<Arc<SignalingHub>>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        clients: hub.client_count(),
        uptime: hub.uptime().as_secs_f64(),
    })
}

/// Metrics handler (Prometheus format)
async fn metrics_handler(State(hub): State<Arc<SignalingHub>>) -> Response {
    match hub.metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
