/*
[INPUT]:  Subscribe/unsubscribe requests, StreamConfig, token provider, transport
[OUTPUT]: One logical subscription surface over N sharded connections
[POS]:    WebSocket layer - public orchestrator and health sweep
[UPDATE]: When changing sharding, staleness thresholds or pool events
*/

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::http::{KucoinClient, KucoinError, Result, TokenProvider};
use crate::types::BootstrapToken;
use crate::ws::config::StreamConfig;
use crate::ws::connection::{Connection, ConnectionObserver, LifecycleState};
use crate::ws::events::{EventBus, EventListener, MarketEvent};
use crate::ws::scheduler::Scheduler;
use crate::ws::subscription::{AttemptState, Subscription, SubscriptionKey};
use crate::ws::transport::{Transport, WsTransport};

struct PoolInner {
    config: StreamConfig,
    provider: Arc<dyn TokenProvider>,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    connections: Mutex<Vec<Connection>>,
    /// Serializes "who holds this key" decisions with the subscribe that follows.
    routing: Mutex<()>,
    next_id: AtomicUsize,
    sweep: Scheduler,
}

/// Shards subscriptions across connections, each holding at most
/// `max_subscriptions_per_connection` keys.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolObserver {
    pool: Weak<PoolInner>,
}

impl ConnectionObserver for PoolObserver {
    fn notify_error(&self, error: &KucoinError) {
        if let Some(pool) = self.pool.upgrade() {
            pool.bus.publish(MarketEvent::Error(error.to_string()));
        }
    }

    fn notify_subscriptions_changed(&self, _connection_id: usize, _subscriptions: Vec<SubscriptionKey>) {
        if let Some(inner) = self.pool.upgrade() {
            ConnectionPool { inner }.publish_subscriptions();
        }
    }

    fn notify(&self, event: MarketEvent) {
        if let Some(pool) = self.pool.upgrade() {
            pool.bus.publish(event);
        }
    }
}

impl ConnectionPool {
    /// Pool backed by the public bullet endpoint and tokio-tungstenite.
    pub fn new(config: StreamConfig) -> Result<Self> {
        let client = KucoinClient::new()?;
        let transport = WsTransport::new(config.handshake_timeout);
        Self::with_components(config, Arc::new(client), Arc::new(transport))
    }

    pub fn with_components(
        config: StreamConfig,
        provider: Arc<dyn TokenProvider>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                bus: EventBus::new(config.event_buffer),
                config,
                provider,
                transport,
                connections: Mutex::new(Vec::new()),
                routing: Mutex::new(()),
                next_id: AtomicUsize::new(0),
                sweep: Scheduler::new("health-sweep"),
            }),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Open the first connection and wait for its welcome. Calling again
    /// after a failed connect retries it; no-op while it is open.
    pub async fn connect(&self) -> Result<()> {
        let connection = {
            let _routing = self.routing();
            let mut connections = self.lock_connections();
            match connections.first() {
                Some(first) => first.clone(),
                None => {
                    let connection = self.new_connection();
                    connections.push(connection.clone());
                    connection
                }
            }
        };
        self.ensure_sweep();
        connection.connect().await
    }

    pub fn subscribe_ticker(&self, symbol: &str) -> bool {
        self.subscribe(SubscriptionKey::ticker(symbol))
    }

    /// Fails for intervals outside the supported table.
    pub fn subscribe_candle(&self, symbol: &str, interval: &str) -> Result<bool> {
        let key = self.parse_candle_key(symbol, interval)?;
        Ok(self.subscribe(key))
    }

    pub fn subscribe_tickers<S: AsRef<str>>(&self, symbols: &[S]) -> usize {
        symbols
            .iter()
            .filter(|symbol| self.subscribe_ticker(symbol.as_ref()))
            .count()
    }

    /// Route `key` to the last connection with spare capacity, opening a new
    /// one when needed. `false` if some connection already holds it.
    pub fn subscribe(&self, key: SubscriptionKey) -> bool {
        let _routing = self.routing();
        let (connection, created) = {
            let mut connections = self.lock_connections();
            let ceiling = self.inner.config.max_subscriptions_per_connection;
            let holder = connections
                .iter()
                .find(|connection| connection.holds(&key))
                .cloned();
            match holder {
                // Resubscribing while the unsubscribe is unconfirmed stays on
                // that connection so a rollback cannot duplicate the key
                Some(holder) if holder.is_unsubscribing(&key) => (holder, false),
                Some(_) => {
                    debug!(subscription = %key, "already subscribed");
                    return false;
                }
                None => match connections.last() {
                    Some(last) if last.load() < ceiling => (last.clone(), false),
                    _ => {
                        let connection = self.new_connection();
                        connections.push(connection.clone());
                        (connection, true)
                    }
                },
            }
        };

        if created {
            info!(connection_id = connection.id(), "opening pool connection");
            let opening = connection.clone();
            tokio::spawn(async move {
                if let Err(err) = opening.connect().await {
                    warn!(connection_id = opening.id(), error = %err, "pool connection failed to open");
                }
            });
        }
        self.ensure_sweep();
        connection.subscribe(key)
    }

    pub async fn unsubscribe_ticker(&self, symbol: &str) -> Result<bool> {
        self.unsubscribe(&SubscriptionKey::ticker(symbol)).await
    }

    pub async fn unsubscribe_candle(&self, symbol: &str, interval: &str) -> Result<bool> {
        let key = self.parse_candle_key(symbol, interval)?;
        self.unsubscribe(&key).await
    }

    /// Number of confirmed unsubscribes; stops at the first error.
    pub async fn unsubscribe_tickers<S: AsRef<str>>(&self, symbols: &[S]) -> Result<usize> {
        let mut confirmed = 0;
        for symbol in symbols {
            if self.unsubscribe_ticker(symbol.as_ref()).await? {
                confirmed += 1;
            }
        }
        Ok(confirmed)
    }

    /// Delegate to whichever connection holds `key`; `Ok(false)` if none does.
    pub async fn unsubscribe(&self, key: &SubscriptionKey) -> Result<bool> {
        let holder = self
            .connections()
            .iter()
            .find(|connection| connection.holds(key))
            .cloned();
        match holder {
            Some(connection) => connection.unsubscribe(key).await,
            None => Ok(false),
        }
    }

    pub async fn unsubscribe_all(&self) -> Result<usize> {
        let mut confirmed = 0;
        for key in self.subscriptions() {
            if self.unsubscribe(&key).await? {
                confirmed += 1;
            }
        }
        Ok(confirmed)
    }

    pub fn get_subscription_number(&self) -> usize {
        self.lock_connections()
            .iter()
            .map(Connection::subscription_count)
            .sum()
    }

    pub fn subscription_count_per_connection(&self) -> Vec<usize> {
        self.lock_connections()
            .iter()
            .map(Connection::subscription_count)
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionKey> {
        self.lock_connections()
            .iter()
            .flat_map(Connection::subscriptions)
            .collect()
    }

    pub fn attempt_state(&self, key: &SubscriptionKey) -> Option<AttemptState> {
        self.lock_connections()
            .iter()
            .find_map(|connection| connection.attempt_state(key))
    }

    /// `true` only when there is at least one connection and all are open.
    pub fn is_socket_open(&self) -> bool {
        let connections = self.lock_connections();
        !connections.is_empty() && connections.iter().all(Connection::is_open)
    }

    pub fn is_socket_connecting(&self) -> bool {
        self.lock_connections().iter().any(Connection::is_connecting)
    }

    pub fn public_token(&self) -> Option<BootstrapToken> {
        self.lock_connections()
            .iter()
            .find_map(Connection::public_token)
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.lock_connections().clone()
    }

    /// Close every connection. Connections that still carry subscriptions
    /// stay open and the first such error is returned.
    pub fn close_connection(&self) -> Result<()> {
        let mut first_error = None;
        for connection in self.connections() {
            if let Err(err) = connection.close_connection() {
                first_error.get_or_insert(err);
            }
        }

        let remaining = {
            let mut connections = self.lock_connections();
            connections.retain(|connection| connection.state() != LifecycleState::Closing);
            connections.len()
        };
        if remaining == 0 {
            self.inner.sweep.stop();
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Run `handler` for every event named `event` (`ticker-BTC/USDT`,
    /// `candle-BTC/USDT-1m`, `subscriptions`, `error`, ...).
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> EventListener
    where
        F: Fn(MarketEvent) + Send + Sync + 'static,
    {
        self.inner.bus.on(event, handler)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<MarketEvent> {
        self.inner.bus.subscribe()
    }

    /// One pass of the health sweep. Runs on its own every
    /// `health_check_interval` once the pool has a connection.
    pub fn check_health(&self) {
        for connection in self.connections() {
            if !connection.received_pong_recently() {
                warn!(
                    connection_id = connection.id(),
                    state = ?connection.state(),
                    "no recent pong, forcing reconnect"
                );
                connection.force_close_connection();
                continue;
            }
            if !connection.is_open() {
                continue;
            }

            for record in connection.subscription_records() {
                if self.is_stale(&connection, &record) {
                    info!(connection_id = connection.id(), subscription = %record.key, "stale subscription, refreshing");
                    self.refresh(connection.clone(), record.key);
                }
            }
        }
    }

    fn is_stale(&self, connection: &Connection, record: &Subscription) -> bool {
        let threshold = self.stale_threshold(&record.key);
        match connection.router().last_received(&record.key) {
            Some(received_at) => received_at.elapsed() > threshold,
            None if record.key.is_ticker() => true,
            None => record.created_at.elapsed() > threshold,
        }
    }

    fn stale_threshold(&self, key: &SubscriptionKey) -> Duration {
        match key.interval() {
            Some(interval) => interval.duration() * self.inner.config.candle_stale_multiplier,
            None => self.inner.config.ticker_stale_after,
        }
    }

    fn refresh(&self, connection: Connection, key: SubscriptionKey) {
        let pool = self.clone();
        tokio::spawn(async move {
            match connection.unsubscribe(&key).await {
                Ok(true) => {
                    pool.subscribe(key);
                }
                Ok(false) => debug!(subscription = %key, "refresh skipped, unsubscribe not acked"),
                Err(err) => debug!(subscription = %key, error = %err, "refresh skipped"),
            }
        });
    }

    fn ensure_sweep(&self) {
        if self.inner.sweep.is_running() {
            return;
        }
        let pool = Arc::downgrade(&self.inner);
        self.inner
            .sweep
            .start(self.inner.config.health_check_interval, move || {
                let pool = pool.clone();
                async move {
                    if let Some(inner) = pool.upgrade() {
                        ConnectionPool { inner }.check_health();
                    }
                }
                .boxed()
            });
    }

    fn new_connection(&self) -> Connection {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        Connection::new(
            id,
            self.inner.config.clone(),
            self.inner.provider.clone(),
            self.inner.transport.clone(),
            self.inner.bus.clone(),
            Arc::new(PoolObserver {
                pool: Arc::downgrade(&self.inner),
            }),
        )
    }

    fn parse_candle_key(&self, symbol: &str, interval: &str) -> Result<SubscriptionKey> {
        SubscriptionKey::parse_candle(symbol, interval).inspect_err(|err| {
            self.inner.bus.publish(MarketEvent::Error(err.to_string()));
        })
    }

    fn publish_subscriptions(&self) {
        let subscriptions = self.subscriptions();
        self.inner
            .bus
            .publish(MarketEvent::Subscriptions(subscriptions));
    }

    fn lock_connections(&self) -> MutexGuard<'_, Vec<Connection>> {
        self.inner
            .connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn routing(&self) -> MutexGuard<'_, ()> {
        self.inner
            .routing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connections", &self.subscription_count_per_connection())
            .field("sweep", &self.inner.sweep)
            .finish()
    }
}
