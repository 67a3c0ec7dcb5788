/*
[INPUT]:  Transport URL (endpoint + token + connectId)
[OUTPUT]: Outbound frame sender / inbound event receiver pair for one socket
[POS]:    WebSocket layer - socket seam (tokio-tungstenite in production)
[UPDATE]: When changing socket options or the pump loop
*/

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::http::{KucoinError, Result};

const CHANNEL_CAPACITY: usize = 256;

/// One text frame to write; `sent` reports the write outcome.
#[derive(Debug)]
pub struct OutboundFrame {
    pub text: String,
    pub sent: oneshot::Sender<Result<()>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    /// Error on an open socket; the socket keeps running until the stream ends.
    Error(String),
}

/// An open socket. Dropping `outbound` closes it; the end of `inbound` means
/// it closed.
#[derive(Debug)]
pub struct TransportChannels {
    pub outbound: mpsc::Sender<OutboundFrame>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Resolves once the socket is open.
    async fn open(&self, url: &str) -> Result<TransportChannels>;
}

/// tokio-tungstenite transport
#[derive(Debug, Clone)]
pub struct WsTransport {
    handshake_timeout: Duration,
}

impl WsTransport {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str) -> Result<TransportChannels> {
        let (ws_stream, _response) = tokio::time::timeout(self.handshake_timeout, connect_async(url))
            .await
            .map_err(|_| KucoinError::Timeout {
                millis: self.handshake_timeout.as_millis() as u64,
            })?
            .map_err(|err| KucoinError::WebSocket(err.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => {
                        match outbound {
                            Some(frame) => {
                                let result = write
                                    .send(WsMessage::Text(frame.text.into()))
                                    .await
                                    .map_err(|err| KucoinError::SendFailed(err.to_string()));
                                let failed = result.is_err();
                                let _ = frame.sent.send(result);
                                if failed {
                                    break;
                                }
                            }
                            None => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                break;
                            }
                        }
                    }
                    incoming = read.next() => {
                        match incoming {
                            Some(Ok(WsMessage::Text(text))) => {
                                if inbound_tx.send(TransportEvent::Frame(text.to_string())).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(WsMessage::Binary(bytes))) => {
                                match String::from_utf8(bytes.to_vec()) {
                                    Ok(text) => {
                                        if inbound_tx.send(TransportEvent::Frame(text)).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(err) => {
                                        debug!(error = %err, "ws binary frame is not utf-8");
                                    }
                                }
                            }
                            Some(Ok(WsMessage::Close(frame))) => {
                                debug!(?frame, "ws close received");
                                let _ = write.send(WsMessage::Close(None)).await;
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(error = %err, "ws read failed");
                                let _ = inbound_tx.send(TransportEvent::Error(err.to_string())).await;
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(TransportChannels {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
