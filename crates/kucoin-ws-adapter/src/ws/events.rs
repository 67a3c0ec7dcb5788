/*
[INPUT]:  Normalized tickers/candles, subscription changes, lifecycle notices
[OUTPUT]: MarketEvent broadcast to any number of listeners
[POS]:    WebSocket layer - consumer-facing publish/subscribe channel
[UPDATE]: When adding event kinds or changing event names
*/

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::types::{CandleInterval, Candle, Ticker};
use crate::ws::subscription::SubscriptionKey;

pub const EVENT_SUBSCRIPTIONS: &str = "subscriptions";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_RECONNECT: &str = "reconnect";
pub const EVENT_SOCKET_NOT_READY: &str = "socket-not-ready";
pub const EVENT_RETRY_SUBSCRIPTION: &str = "retry-subscription";

#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Ticker(Ticker),
    /// A closed bar
    Candle {
        interval: CandleInterval,
        candle: Candle,
    },
    /// Full subscription list across every connection
    Subscriptions(Vec<SubscriptionKey>),
    Error(String),
    Reconnect(String),
    SocketNotReady(String),
    RetrySubscription(String),
}

impl MarketEvent {
    /// Event name: `ticker-<symbol>`, `candle-<symbol>-<interval>`, `error`, ...
    pub fn name(&self) -> String {
        match self {
            MarketEvent::Ticker(ticker) => format!("ticker-{}", ticker.symbol),
            MarketEvent::Candle { interval, candle } => {
                format!("candle-{}-{}", candle.symbol, interval)
            }
            MarketEvent::Subscriptions(_) => EVENT_SUBSCRIPTIONS.to_string(),
            MarketEvent::Error(_) => EVENT_ERROR.to_string(),
            MarketEvent::Reconnect(_) => EVENT_RECONNECT.to_string(),
            MarketEvent::SocketNotReady(_) => EVENT_SOCKET_NOT_READY.to_string(),
            MarketEvent::RetrySubscription(_) => EVENT_RETRY_SUBSCRIPTION.to_string(),
        }
    }
}

/// Cloneable publisher; every clone feeds the same listeners.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MarketEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishing with no listeners is not an error.
    pub fn publish(&self, event: MarketEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.tx.subscribe()
    }

    /// Run `handler` for every event whose name equals `event`.
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> EventListener
    where
        F: Fn(MarketEvent) + Send + Sync + 'static,
    {
        let event = event.into();
        let handler = Arc::new(handler);
        let mut rx = self.tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if message.name() == event {
                            handler(message);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(event = %event, skipped, "event listener lagged");
                    }
                    Err(RecvError::Closed) => {
                        debug!(event = %event, "event bus closed");
                        break;
                    }
                }
            }
        });

        EventListener { handle }
    }
}

/// Handle returned by [`EventBus::on`]. Dropping it keeps the handler running.
#[derive(Debug)]
pub struct EventListener {
    handle: JoinHandle<()>,
}

impl EventListener {
    /// Detach the handler.
    pub fn off(self) {
        self.handle.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}
