//! airmac-controller - headless controller
//!
//! Connects to the relay, lists hosts and, when `--host` is given, negotiates a
//! peer connection with that host and logs what arrives on its data channels.

use airmac_signaling::args::ControllerArgs;
use airmac_signaling::client::{self, webrtc_peer::WebRtcConnector};
use airmac_signaling::transport::WebSocketDialer;
use airmac_signaling::{ConnectionState, SessionNotification};
use clap::Parser;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ControllerArgs::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("AIRMAC_LOG").unwrap_or_else(|_| log_level.to_string()))
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .init();

    let config = args.load_config()?;
    let client_config = config.client;
    let target = client_config.host_id.clone();

    let connector = Arc::new(WebRtcConnector::new(client_config.ice_servers.clone()));
    let (handle, mut notifications, task) =
        client::spawn(&client_config, Arc::new(WebSocketDialer::new()), connector);

    info!(
        "Controller {} connecting to {}",
        handle.controller_id(),
        client_config.signaling_url
    );
    handle.connect(client_config.signaling_url.clone())?;

    let mut selecting = false;
    let mut frames: u64 = 0;
    let mut left_disconnected = false;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            notification = notifications.recv() => {
                let Some(notification) = notification else {
                    break;
                };
                match notification {
                    SessionNotification::StateChanged(state) => {
                        info!("State: {}", state);
                        match state {
                            ConnectionState::Disconnected if left_disconnected => break,
                            ConnectionState::Disconnected => {}
                            _ => left_disconnected = true,
                        }
                        if state != ConnectionState::SelectingHost {
                            selecting = false;
                        }
                    }
                    SessionNotification::HostsUpdated(hosts) => {
                        info!("{} host(s) online", hosts.len());
                        for host in &hosts {
                            info!("  {}", host.id);
                        }
                        let Some(ref wanted) = target else {
                            continue;
                        };
                        if !selecting
                            && handle.state() == ConnectionState::SelectingHost
                            && hosts.iter().any(|h| &h.id == wanted)
                        {
                            selecting = true;
                            handle.select_host(wanted.clone())?;
                        }
                    }
                    SessionNotification::Error(message) => warn!("{}", message),
                    SessionNotification::DataChannelOpen(label) => {
                        info!("Data channel open: {}", label)
                    }
                    SessionNotification::Frame(frame) => {
                        frames += 1;
                        debug!("Frame {} ({} bytes)", frames, frame.len());
                    }
                }
            }
        }
    }

    let _ = handle.shutdown();
    if let Err(e) = task.await {
        error!("Orchestrator task failed: {}", e);
    }
    info!("Controller stopped after {} frame(s)", frames);
    Ok(())
}
