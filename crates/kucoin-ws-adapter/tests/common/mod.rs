/*
[INPUT]:  Test configuration and scripted venue behaviour
[OUTPUT]: Shared test utilities: in-memory transport, static token provider
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for kucoin-ws-adapter tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kucoin_ws_adapter::ws::{OutboundFrame, TransportChannels, TransportEvent};
use kucoin_ws_adapter::{BootstrapToken, KucoinError, MarketEvent, Result, StreamConfig, TokenProvider, Transport};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use url::Url;
use wiremock::MockServer;

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

/// Bullet response body as the venue returns it
pub fn bullet_body(token: &str, endpoint: &str, ping_interval_ms: u64) -> Value {
    json!({
        "code": "200000",
        "data": {
            "token": token,
            "instanceServers": [{
                "endpoint": endpoint,
                "encrypt": true,
                "protocol": "websocket",
                "pingInterval": ping_interval_ms,
                "pingTimeout": 10_000
            }]
        }
    })
}

pub fn test_config() -> StreamConfig {
    StreamConfig::default()
}

#[derive(Debug)]
pub struct StaticTokenProvider {
    token: String,
    endpoint: String,
    ping_interval: Duration,
    delay: Duration,
    calls: AtomicUsize,
}

impl StaticTokenProvider {
    pub fn new(token: &str, ping_interval: Duration) -> Arc<Self> {
        Self::with_delay(token, ping_interval, Duration::ZERO)
    }

    /// Provider whose bootstrap call takes `delay` to answer.
    pub fn with_delay(token: &str, ping_interval: Duration, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            token: token.to_string(),
            endpoint: "wss://ws-api-spot.kucoin.test/".to_string(),
            ping_interval,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch_token(&self) -> Result<BootstrapToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(BootstrapToken {
            token: self.token.clone(),
            endpoint: self.endpoint.clone(),
            ping_interval: self.ping_interval,
        })
    }
}

/// How the scripted venue answers.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub welcome: bool,
    pub ack: bool,
    pub pong: bool,
    pub fail_sends: bool,
    pub fail_open: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            welcome: true,
            ack: true,
            pong: true,
            fail_sends: false,
            fail_open: false,
        }
    }
}

#[derive(Debug)]
enum ServerCommand {
    Push(String),
    Close,
}

#[derive(Debug, Default)]
struct MockState {
    behavior: Behavior,
    urls: Vec<String>,
    sent: Vec<Value>,
    sockets: Vec<mpsc::UnboundedSender<ServerCommand>>,
}

/// In-memory venue: answers the welcome, acks and pongs per [`Behavior`],
/// records every frame the client writes.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_behavior(&self, update: impl FnOnce(&mut Behavior)) {
        update(&mut self.lock().behavior);
    }

    pub fn opens(&self) -> usize {
        self.lock().urls.len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.lock().urls.clone()
    }

    pub fn sent(&self) -> Vec<Value> {
        self.lock().sent.clone()
    }

    pub fn sent_of_type(&self, kind: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|frame| frame["type"] == kind)
            .collect()
    }

    /// Deliver a frame on every socket opened so far.
    pub fn push(&self, frame: Value) {
        let text = frame.to_string();
        for socket in &self.lock().sockets {
            let _ = socket.send(ServerCommand::Push(text.clone()));
        }
    }

    /// Server-side close of the most recent socket.
    pub fn close_latest(&self) {
        if let Some(socket) = self.lock().sockets.last() {
            let _ = socket.send(ServerCommand::Close);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, url: &str) -> Result<TransportChannels> {
        let behavior = self.lock().behavior.clone();
        if behavior.fail_open {
            return Err(KucoinError::WebSocket("connection refused".to_string()));
        }

        let connect_id = Url::parse(url)?
            .query_pairs()
            .find(|(name, _)| name == "connectId")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(64);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        {
            let mut state = self.lock();
            state.urls.push(url.to_string());
            state.sockets.push(command_tx);
        }

        if behavior.welcome {
            let welcome = json!({ "id": connect_id, "type": "welcome" }).to_string();
            let _ = inbound_tx.send(TransportEvent::Frame(welcome)).await;
        }

        let state = self.state.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => {
                        let Some(frame) = outbound else { break };
                        let behavior = state.lock().unwrap().behavior.clone();
                        if behavior.fail_sends {
                            let _ = frame.sent.send(Err(KucoinError::SendFailed("mock write failed".to_string())));
                            continue;
                        }
                        let value: Value = serde_json::from_str(&frame.text).unwrap();
                        state.lock().unwrap().sent.push(value.clone());
                        let _ = frame.sent.send(Ok(()));

                        let reply = match value["type"].as_str() {
                            Some("subscribe" | "unsubscribe") if behavior.ack => Some("ack"),
                            Some("ping") if behavior.pong => Some("pong"),
                            _ => None,
                        };
                        if let Some(kind) = reply {
                            let text = json!({ "id": value["id"], "type": kind }).to_string();
                            if inbound_tx.send(TransportEvent::Frame(text)).await.is_err() {
                                break;
                            }
                        }
                    }
                    command = command_rx.recv() => match command {
                        Some(ServerCommand::Push(text)) => {
                            if inbound_tx.send(TransportEvent::Frame(text)).await.is_err() {
                                break;
                            }
                        }
                        Some(ServerCommand::Close) | None => break,
                    },
                }
            }
        });

        Ok(TransportChannels {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

pub fn ticker_frame(venue_symbol: &str, price: &str) -> Value {
    json!({
        "type": "message",
        "topic": format!("/market/ticker:{venue_symbol}"),
        "subject": "trade.ticker",
        "data": {
            "bestAsk": price, "bestAskSize": "1", "bestBid": price, "bestBidSize": "1",
            "price": price, "sequence": "1", "size": "0.1", "time": 1_767_225_600_000_i64
        }
    })
}

pub fn candle_frame(subject: &str, venue_symbol: &str, venue_interval: &str, candle: [&str; 7]) -> Value {
    json!({
        "type": "message",
        "topic": format!("/market/candles:{venue_symbol}_{venue_interval}"),
        "subject": subject,
        "data": { "symbol": venue_symbol, "candles": candle, "time": 1_767_225_600_000_i64 }
    })
}

pub fn drain(events: &mut broadcast::Receiver<MarketEvent>) -> Vec<MarketEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
