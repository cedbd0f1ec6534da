//! Client-side signaling transport
//!
//! The orchestrator talks to the relay through a `SignalingChannel`: a pair of
//! queues backed by reader/writer tasks owned by the dialer. Dropping the
//! outbound sender closes the socket.

use super::TransportError;
use crate::protocol::{CodecError, Message};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Open signaling link
#[derive(Debug)]
pub struct SignalingChannel {
    /// Messages to send; drop to close
    pub outbound: mpsc::UnboundedSender<Message>,
    /// Decoded inbound messages, then at most one error before the stream ends
    pub inbound: mpsc::UnboundedReceiver<Result<Message, TransportError>>,
}

/// Opens signaling links
#[async_trait]
pub trait SignalingDialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<SignalingChannel, TransportError>;
}

/// WebSocket dialer
#[derive(Debug, Clone, Default)]
pub struct WebSocketDialer;

impl WebSocketDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SignalingDialer for WebSocketDialer {
    async fn dial(&self, url: &str) -> Result<SignalingChannel, TransportError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!("Connected to signaling server at {}", url);

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Dropping unencodable message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(WsMessage::Text(text)).await {
                    debug!("Signaling write failed: {}", e);
                    return;
                }
            }
            let _ = write.send(WsMessage::Close(None)).await;
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let decoded = match frame {
                    Ok(WsMessage::Text(text)) => Message::from_json(&text),
                    Ok(WsMessage::Binary(data)) => Message::from_slice(&data),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = inbound_tx.send(Err(TransportError::WebSocket(e.to_string())));
                        return;
                    }
                };
                match decoded {
                    Ok(message) => {
                        if inbound_tx.send(Ok(message)).is_err() {
                            return;
                        }
                    }
                    Err(CodecError::Invalid { kind, reason }) => {
                        warn!("Ignoring invalid {} message from server: {}", kind, reason);
                    }
                    Err(e) => warn!("Ignoring frame from server: {}", e),
                }
            }
            let _ = inbound_tx.send(Err(TransportError::Closed));
        });

        Ok(SignalingChannel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
