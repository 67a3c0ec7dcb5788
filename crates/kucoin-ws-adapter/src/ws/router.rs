/*
[INPUT]:  Inbound text frames from one connection
[OUTPUT]: Resolved pending waits, ticker/candle snapshots, MarketEvents
[POS]:    WebSocket layer - inbound demultiplexer for a single connection
[UPDATE]: When adding subjects or changing ack / dedup semantics
*/

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::http::{KucoinError, Result};
use crate::types::{Candle, CandleInterval, RawTicker, Ticker, from_venue_symbol};
use crate::ws::events::{EventBus, MarketEvent};
use crate::ws::message::{
    MessageType, SUBJECT_CANDLE_ADD, SUBJECT_CANDLE_UPDATE, SUBJECT_TICKER, WireMessage,
    interval_from_candle_topic, symbol_from_ticker_topic, wait_key,
};
use crate::ws::subscription::SubscriptionKey;

/// Last value seen for a key and when it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub value: T,
    pub received_at: Instant,
}

impl<T> Snapshot<T> {
    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }
}

#[derive(Debug, Deserialize)]
struct CandlePayload {
    symbol: String,
    candles: Vec<String>,
}

#[derive(Debug, Default)]
struct Cache {
    tickers: HashMap<String, Snapshot<Ticker>>,
    candles: HashMap<(String, CandleInterval), Snapshot<Candle>>,
}

#[derive(Debug)]
struct RouterInner {
    pending: Mutex<HashMap<String, oneshot::Sender<()>>>,
    cache: Mutex<Cache>,
    bus: EventBus,
    wait_timeout: Duration,
}

/// Per-connection router. Clones share state.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    inner: Arc<RouterInner>,
}

impl MessageRouter {
    pub fn new(bus: EventBus, wait_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                pending: Mutex::new(HashMap::new()),
                cache: Mutex::new(Cache::default()),
                bus,
                wait_timeout,
            }),
        }
    }

    /// Register a wait for `<event>-<id>` now; await it later.
    ///
    /// Register before sending the frame that triggers the reply.
    pub fn register_wait(&self, event: &str, id: &str) -> PendingWait {
        let key = wait_key(event, id);
        let (tx, rx) = oneshot::channel();
        self.pending().insert(key.clone(), tx);

        PendingWait {
            key,
            rx,
            router: self.clone(),
            timeout: self.inner.wait_timeout,
        }
    }

    /// `true` if a matching frame arrived before the deadline.
    pub async fn wait_for_event(&self, event: &str, id: &str) -> bool {
        self.register_wait(event, id).wait().await
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Route one raw frame. Frames that resolve a pending wait stop there.
    pub fn process_message(&self, raw: &str) -> Result<()> {
        let frame = WireMessage::parse(raw)?;

        if self.resolve(&frame.wait_key()) {
            trace!(kind = %frame.kind, id = %frame.id, "pending wait resolved");
            return Ok(());
        }

        if frame.kind == MessageType::Error {
            let message = match &frame.data {
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None => format!("error frame {}", frame.id),
            };
            self.inner.bus.publish(MarketEvent::Error(message));
            return Ok(());
        }

        match frame.subject.as_deref() {
            Some(SUBJECT_TICKER) => self.route_ticker(frame),
            Some(SUBJECT_CANDLE_UPDATE) => self.route_candle(frame, false),
            Some(SUBJECT_CANDLE_ADD) => self.route_candle(frame, true),
            _ => {
                trace!(kind = %frame.kind, subject = ?frame.subject, "frame not routed");
                Ok(())
            }
        }
    }

    pub fn ticker_snapshot(&self, symbol: &str) -> Option<Snapshot<Ticker>> {
        self.cache().tickers.get(symbol).cloned()
    }

    pub fn candle_snapshot(&self, symbol: &str, interval: CandleInterval) -> Option<Snapshot<Candle>> {
        self.cache()
            .candles
            .get(&(symbol.to_string(), interval))
            .cloned()
    }

    /// When the latest value for the subscription arrived.
    pub fn last_received(&self, key: &SubscriptionKey) -> Option<Instant> {
        let cache = self.cache();
        match key {
            SubscriptionKey::Ticker { symbol } => {
                cache.tickers.get(symbol).map(|snapshot| snapshot.received_at)
            }
            SubscriptionKey::Candle { symbol, interval } => cache
                .candles
                .get(&(symbol.clone(), *interval))
                .map(|snapshot| snapshot.received_at),
        }
    }

    pub fn clear_snapshot(&self, key: &SubscriptionKey) {
        let mut cache = self.cache();
        match key {
            SubscriptionKey::Ticker { symbol } => {
                cache.tickers.remove(symbol);
            }
            SubscriptionKey::Candle { symbol, interval } => {
                cache.candles.remove(&(symbol.clone(), *interval));
            }
        }
    }

    pub fn clear_cache(&self) {
        let mut cache = self.cache();
        cache.tickers.clear();
        cache.candles.clear();
    }

    fn resolve(&self, key: &str) -> bool {
        let Some(tx) = self.pending().remove(key) else {
            return false;
        };
        let _ = tx.send(());
        true
    }

    fn remove_pending(&self, key: &str) -> bool {
        self.pending().remove(key).is_some()
    }

    fn route_ticker(&self, frame: WireMessage) -> Result<()> {
        let topic = frame.topic.as_deref().unwrap_or_default();
        let symbol = symbol_from_ticker_topic(topic)?;
        let raw: RawTicker = serde_json::from_value(require_data(frame.data)?)?;
        let ticker = Ticker::from_raw(&symbol, raw)?;

        self.cache().tickers.insert(
            symbol,
            Snapshot {
                value: ticker.clone(),
                received_at: Instant::now(),
            },
        );
        self.inner.bus.publish(MarketEvent::Ticker(ticker));
        Ok(())
    }

    /// `update` carries the forming bar and only refreshes the snapshot.
    /// `add` means the bar rolled over: the previous snapshot is the closed
    /// bar and is the only thing ever emitted.
    fn route_candle(&self, frame: WireMessage, rolled_over: bool) -> Result<()> {
        let topic = frame.topic.as_deref().unwrap_or_default();
        let interval = interval_from_candle_topic(topic)?;
        let payload: CandlePayload = serde_json::from_value(require_data(frame.data)?)?;
        let symbol = from_venue_symbol(&payload.symbol);
        let candle = Candle::from_raw(&symbol, payload.candles)?;

        let closed = {
            let mut cache = self.cache();
            let previous = cache.candles.insert(
                (symbol.clone(), interval),
                Snapshot {
                    value: candle,
                    received_at: Instant::now(),
                },
            );
            if rolled_over { previous } else { None }
        };

        if let Some(closed) = closed {
            debug!(%symbol, %interval, timestamp = closed.value.timestamp, "candle closed");
            self.inner.bus.publish(MarketEvent::Candle {
                interval,
                candle: closed.value,
            });
        }
        Ok(())
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<()>>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cache(&self) -> MutexGuard<'_, Cache> {
        self.inner
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn require_data(data: Option<Value>) -> Result<Value> {
    data.ok_or_else(|| KucoinError::InvalidResponse("frame without data".to_string()))
}

/// A registered wait. Exactly one of "matching frame" and "deadline" wins:
/// whoever removes the registry entry first.
#[derive(Debug)]
pub struct PendingWait {
    key: String,
    rx: oneshot::Receiver<()>,
    router: MessageRouter,
    timeout: Duration,
}

impl PendingWait {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn wait(self) -> bool {
        let PendingWait {
            key,
            mut rx,
            router,
            timeout,
        } = self;

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(())) => true,
            // Replaced by a newer wait under the same key
            Ok(Err(_)) => false,
            Err(_) => {
                if router.remove_pending(&key) {
                    trace!(%key, "pending wait timed out");
                    false
                } else {
                    rx.try_recv().is_ok()
                }
            }
        }
    }

    /// Drop the registration, e.g. when the triggering send failed.
    pub fn cancel(self) {
        self.router.remove_pending(&self.key);
    }

    /// Await in the background and hand the outcome to `callback`.
    pub fn then<F>(self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        tokio::spawn(async move {
            let resolved = self.wait().await;
            callback(resolved);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    fn router() -> (MessageRouter, tokio::sync::broadcast::Receiver<MarketEvent>) {
        let bus = EventBus::new(64);
        let rx = bus.subscribe();
        (MessageRouter::new(bus, Duration::from_secs(2)), rx)
    }

    fn candle_frame(subject: &str, open: &str, close: &str) -> String {
        json!({
            "type": "message",
            "topic": "/market/candles:BTC-USDT_1min",
            "subject": subject,
            "data": {
                "symbol": "BTC-USDT",
                "candles": ["1767225600", open, close, "110", "90", "3.5", "350"],
                "time": 1_767_225_601_000_i64
            }
        })
        .to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn matching_frame_resolves_wait() {
        let (router, mut events) = router();
        let wait = router.register_wait("ack", "sub-1");
        assert_eq!(router.pending_count(), 1);

        router
            .process_message(r#"{"id":"sub-1","type":"ack"}"#)
            .unwrap();

        assert!(wait.wait().await);
        assert_eq!(router.pending_count(), 0);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_and_late_frame_is_ignored() {
        let (router, _events) = router();
        assert!(!router.wait_for_event("pong", "p1").await);
        assert_eq!(router.pending_count(), 0);

        // No wait left: falls through to routing and is simply not routed
        router.process_message(r#"{"id":"p1","type":"pong"}"#).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn then_reports_outcome_once() {
        let (router, _events) = router();
        let (tx, rx) = oneshot::channel();
        router.register_wait("welcome", "abc").then(move |ok| {
            let _ = tx.send(ok);
        });

        router
            .process_message(r#"{"id":"abc","type":"welcome"}"#)
            .unwrap();
        assert!(rx.await.unwrap());
    }

    #[tokio::test]
    async fn cancel_removes_registration() {
        let (router, _events) = router();
        router.register_wait("ack", "x").cancel();
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn ticker_frame_updates_snapshot_and_emits() {
        let (router, mut events) = router();
        let frame = json!({
            "type": "message",
            "topic": "/market/ticker:BTC-USDT",
            "subject": "trade.ticker",
            "data": {
                "bestAsk": "101", "bestAskSize": "1", "bestBid": "99", "bestBidSize": "2",
                "price": "100", "sequence": "7", "size": "0.1", "time": 1_767_225_600_000_i64
            }
        });

        router.process_message(&frame.to_string()).unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(event.name(), "ticker-BTC/USDT");
        let MarketEvent::Ticker(ticker) = event else {
            panic!("expected ticker event");
        };
        assert_eq!(ticker.ask.to_string(), "101");
        assert_eq!(ticker.low.to_string(), "99");
        assert_eq!(router.ticker_snapshot("BTC/USDT").unwrap().value, ticker);
        assert!(router.last_received(&SubscriptionKey::ticker("BTC/USDT")).is_some());
    }

    #[tokio::test]
    async fn consecutive_updates_emit_nothing() {
        let (router, mut events) = router();
        router
            .process_message(&candle_frame(SUBJECT_CANDLE_UPDATE, "100", "101"))
            .unwrap();
        router
            .process_message(&candle_frame(SUBJECT_CANDLE_UPDATE, "100", "102"))
            .unwrap();

        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        let snapshot = router
            .candle_snapshot("BTC/USDT", CandleInterval::OneMinute)
            .unwrap();
        assert_eq!(snapshot.value.close.to_string(), "102");
    }

    #[tokio::test]
    async fn add_after_update_emits_the_closed_bar() {
        let (router, mut events) = router();
        router
            .process_message(&candle_frame(SUBJECT_CANDLE_UPDATE, "100", "104"))
            .unwrap();
        router
            .process_message(&candle_frame(SUBJECT_CANDLE_ADD, "104", "104"))
            .unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(event.name(), "candle-BTC/USDT-1m");
        let MarketEvent::Candle { interval, candle } = event else {
            panic!("expected candle event");
        };
        assert_eq!(interval, CandleInterval::OneMinute);
        assert_eq!(candle.open.to_string(), "100");
        assert_eq!(candle.close.to_string(), "104");
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        let current = router
            .candle_snapshot("BTC/USDT", CandleInterval::OneMinute)
            .unwrap();
        assert_eq!(current.value.open.to_string(), "104");
    }

    #[tokio::test]
    async fn first_add_without_prior_bar_emits_nothing() {
        let (router, mut events) = router();
        router
            .process_message(&candle_frame(SUBJECT_CANDLE_ADD, "1", "2"))
            .unwrap();
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn unknown_venue_interval_is_an_error() {
        let (router, _events) = router();
        let frame = json!({
            "type": "message",
            "topic": "/market/candles:BTC-USDT_5min",
            "subject": "trade.candles.update",
            "data": { "symbol": "BTC-USDT", "candles": ["1", "1", "1", "1", "1", "1", "1"] }
        });

        assert!(matches!(
            router.process_message(&frame.to_string()),
            Err(KucoinError::UnknownVenueInterval(_))
        ));
    }

    #[tokio::test]
    async fn error_frame_is_published() {
        let (router, mut events) = router();
        router
            .process_message(r#"{"id":"9","type":"error","code":404,"data":"topic not found"}"#)
            .unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            MarketEvent::Error("topic not found".to_string())
        );
    }

    #[tokio::test]
    async fn clear_snapshot_and_cache() {
        let (router, _events) = router();
        router
            .process_message(&candle_frame(SUBJECT_CANDLE_UPDATE, "1", "2"))
            .unwrap();
        let key = SubscriptionKey::candle("BTC/USDT", CandleInterval::OneMinute);
        assert!(router.last_received(&key).is_some());

        router.clear_snapshot(&key);
        assert!(router.last_received(&key).is_none());

        router
            .process_message(&candle_frame(SUBJECT_CANDLE_UPDATE, "1", "2"))
            .unwrap();
        router.clear_cache();
        assert!(router.candle_snapshot("BTC/USDT", CandleInterval::OneMinute).is_none());
    }

    #[test]
    fn malformed_json_is_rejected() {
        let (router, _events) = router();
        assert!(matches!(
            router.process_message("{not json"),
            Err(KucoinError::Serialization(_))
        ));
    }
}
