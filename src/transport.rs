//! Broker transport module
//!
//! This module moves STOMP frames between the client and the chat broker:
//! - `BrokerLink`, the channel pair the connection manager reads and writes
//! - `Connector`, the seam used to open links (swapped for an in-memory
//!   broker in tests)
//! - `WebSocketConnector`, STOMP over WebSocket text messages

use crate::protocol::{Frame, FrameDecoder};
use crate::{ConnectionError, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::http::Uri;
use tracing::{debug, error, info, warn};

/// Client side of an open broker link
///
/// Dropping `outbound` closes the socket once queued frames are written;
/// `inbound` yields `None` when the broker side goes away.
#[derive(Debug)]
pub struct BrokerLink {
    /// Frames to write to the broker
    pub outbound: mpsc::UnboundedSender<Frame>,
    /// Frames read from the broker
    pub inbound: mpsc::UnboundedReceiver<Frame>,
}

/// Broker side of a link, owned by whatever drives the socket
#[derive(Debug)]
pub struct BrokerSide {
    /// Frames the client wants written
    pub from_client: mpsc::UnboundedReceiver<Frame>,
    /// Frames to hand to the client
    pub to_client: mpsc::UnboundedSender<Frame>,
}

impl BrokerLink {
    /// Create a connected link/side pair
    pub fn pair() -> (BrokerLink, BrokerSide) {
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        (
            BrokerLink { outbound, inbound },
            BrokerSide {
                from_client,
                to_client,
            },
        )
    }
}

/// Opens links to the broker
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh link; the STOMP handshake is left to the caller
    async fn open(&self) -> Result<BrokerLink>;

    /// Virtual host announced in the CONNECT frame
    fn host(&self) -> String;
}

/// STOMP over WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Create a connector for a `ws://` or `wss://` endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self) -> Result<BrokerLink> {
        info!("Opening WebSocket to {}", self.url);

        let (ws_stream, _response) = connect_async(self.url.as_str()).await.map_err(|e| {
            ConnectionError::Transport(format!("Failed to open {}: {}", self.url, e))
        })?;
        let (mut sink, mut stream) = ws_stream.split();

        let (link, side) = BrokerLink::pair();
        let BrokerSide {
            mut from_client,
            to_client,
        } = side;

        tokio::spawn(async move {
            while let Some(frame) = from_client.recv().await {
                debug!("-> {}", frame.command);
                if let Err(e) = sink.send(WsMessage::text(frame.encode())).await {
                    error!("WebSocket write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("WebSocket writer finished");
        });

        tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            while let Some(message) = stream.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => decoder.push(text.as_str()),
                    Ok(WsMessage::Binary(data)) => decoder.push(&String::from_utf8_lossy(&data)),
                    Ok(WsMessage::Close(reason)) => {
                        info!("Broker closed the WebSocket: {:?}", reason);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("WebSocket read failed: {}", e);
                        break;
                    }
                }

                loop {
                    match decoder.next_frame() {
                        Ok(Some(frame)) => {
                            debug!("<- {}", frame.command);
                            if to_client.send(frame).is_err() {
                                debug!("Client side of link dropped; stopping reader");
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => warn!("Skipping undecodable broker input: {}", e),
                    }
                }
            }
            debug!("WebSocket reader finished");
        });

        Ok(link)
    }

    fn host(&self) -> String {
        self.url
            .parse::<Uri>()
            .ok()
            .and_then(|uri| uri.host().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string())
    }
}
