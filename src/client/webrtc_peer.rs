//! webrtc-rs peer connections for the controller
//!
//! The controller creates the `input` data channel so its offer carries an
//! application section; the host may open `frames` (downstream JPEG frames)
//! and its own `input` channel, which then replaces ours for sending.

use super::peer::{PeerConnectionState, PeerConnector, PeerEvent, PeerEventSink, PeerSession};
use super::SessionError;
use crate::protocol::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

const INPUT_CHANNEL: &str = "input";
const FRAMES_CHANNEL: &str = "frames";

/// Builds webrtc-rs peer connections with the configured ICE servers
#[derive(Debug, Clone)]
pub struct WebRtcConnector {
    ice_servers: Vec<String>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

fn peer_error(context: &str, e: impl std::fmt::Display) -> SessionError {
    SessionError::Peer(format!("{}: {}", context, e))
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self, sink: PeerEventSink) -> Result<Box<dyn PeerSession>, SessionError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| peer_error("Failed to register codecs", e))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| peer_error("Failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| peer_error("Failed to create peer connection", e))?,
        );

        let input_channel = Arc::new(Mutex::new(None));
        install_callbacks(&peer_connection, sink.clone(), input_channel.clone());

        let channel = peer_connection
            .create_data_channel(INPUT_CHANNEL, None)
            .await
            .map_err(|e| peer_error("Failed to create data channel", e))?;
        attach_channel(channel.clone(), sink.clone());
        *input_channel.lock() = Some(channel);

        debug!("Peer connection created for generation {}", sink.generation());
        Ok(Box::new(WebRtcPeer {
            peer_connection,
            input_channel,
        }))
    }
}

fn install_callbacks(
    peer_connection: &Arc<RTCPeerConnection>,
    sink: PeerEventSink,
    input_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
) {
    let ice_sink = sink.clone();
    peer_connection.on_ice_candidate(Box::new(move |candidate| {
        let sink = ice_sink.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    sink.emit(PeerEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mline_index: init.sdp_mline_index.unwrap_or(0),
                        sdp_mid: init.sdp_mid,
                    }));
                }
                Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
            }
        })
    }));

    let state_sink = sink.clone();
    peer_connection.on_peer_connection_state_change(Box::new(move |state| {
        let sink = state_sink.clone();
        Box::pin(async move {
            info!("Peer connection state: {}", state);
            if let Some(state) = map_state(state) {
                sink.emit(PeerEvent::StateChanged(state));
            }
        })
    }));

    peer_connection.on_data_channel(Box::new(move |channel| {
        let sink = sink.clone();
        let input_channel = input_channel.clone();
        Box::pin(async move {
            let label = channel.label().to_string();
            info!("Data channel received: {}", label);
            match label.as_str() {
                FRAMES_CHANNEL => attach_channel(channel, sink),
                INPUT_CHANNEL => {
                    attach_channel(channel.clone(), sink);
                    *input_channel.lock() = Some(channel);
                }
                other => debug!("Ignoring data channel {}", other),
            }
        })
    }));
}

/// Report open and forward binary messages as frames
fn attach_channel(channel: Arc<RTCDataChannel>, sink: PeerEventSink) {
    let label = channel.label().to_string();
    let open_sink = sink.clone();
    channel.on_open(Box::new(move || {
        Box::pin(async move {
            open_sink.emit(PeerEvent::DataChannelOpen(label));
        })
    }));

    channel.on_message(Box::new(move |message: DataChannelMessage| {
        let sink = sink.clone();
        Box::pin(async move {
            if !message.is_string {
                sink.emit(PeerEvent::Frame(message.data));
            }
        })
    }));
}

fn map_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

struct WebRtcPeer {
    peer_connection: Arc<RTCPeerConnection>,
    input_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
}

#[async_trait]
impl PeerSession for WebRtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription, SessionError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| peer_error("Failed to create offer", e))?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| peer_error("Failed to set local description", e))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), SessionError> {
        let description = match answer.sdp_type {
            SdpType::Answer => RTCSessionDescription::answer(answer.sdp),
            SdpType::Pranswer => RTCSessionDescription::pranswer(answer.sdp),
            other => return Err(SessionError::Peer(format!("Unexpected {:?} in answer", other))),
        }
        .map_err(|e| peer_error("Invalid SDP answer", e))?;

        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| peer_error("Failed to set remote description", e))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: Some(candidate.sdp_mline_index),
            username_fragment: None,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| peer_error("Failed to add ICE candidate", e))
    }

    async fn send_input(&self, data: Bytes) -> Result<(), SessionError> {
        let channel = self.input_channel.lock().clone();
        let channel = channel.ok_or_else(|| SessionError::Peer("Input channel not open".to_string()))?;
        channel
            .send(&data)
            .await
            .map(|_| ())
            .map_err(|e| peer_error("Failed to send input", e))
    }

    async fn close(&self) {
        if let Err(e) = self.peer_connection.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
    }
}
