/*
[INPUT]:  Token provider, transport, StreamConfig, subscription requests
[OUTPUT]: One managed socket: welcome handshake, heartbeat, ack-tracked
          subscribe/unsubscribe with retry, reconnect with replay
[POS]:    WebSocket layer - single connection lifecycle
[UPDATE]: When changing lifecycle states, the command queue or retry rules
*/

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use rand::RngCore;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::http::{KucoinError, Result, TokenProvider};
use crate::types::BootstrapToken;
use crate::ws::config::StreamConfig;
use crate::ws::events::{EventBus, MarketEvent};
use crate::ws::message::{MessageType, WireMessage, truncate_for_log};
use crate::ws::router::MessageRouter;
use crate::ws::scheduler::Scheduler;
use crate::ws::subscription::{AttemptState, Subscription, SubscriptionKey};
use crate::ws::transport::{OutboundFrame, Transport, TransportEvent};

const COMMAND_LOG_LIMIT: usize = 20;
const ROUTE_FAIL_LOG_LIMIT: usize = 5;
const RAW_LOG_MAX_BYTES: usize = 512;

static COMMAND_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static ROUTE_FAIL_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Disconnected,
    Bootstrapping,
    SocketOpening,
    AwaitingWelcome,
    Open,
    /// Closed by the caller; terminal
    Closing,
    /// Waiting out the reconnect delay
    Reconnecting,
}

impl LifecycleState {
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            LifecycleState::Bootstrapping
                | LifecycleState::SocketOpening
                | LifecycleState::AwaitingWelcome
                | LifecycleState::Reconnecting
        )
    }
}

/// What a connection reports upward. The pool implements this; a bare
/// [`EventBus`] does too for standalone use.
pub trait ConnectionObserver: Send + Sync {
    fn notify_error(&self, error: &KucoinError);
    fn notify_subscriptions_changed(&self, connection_id: usize, subscriptions: Vec<SubscriptionKey>);
    /// Lifecycle notices: reconnect, socket-not-ready, retry-subscription.
    fn notify(&self, event: MarketEvent);
}

impl ConnectionObserver for EventBus {
    fn notify_error(&self, error: &KucoinError) {
        self.publish(MarketEvent::Error(error.to_string()));
    }

    fn notify_subscriptions_changed(&self, _connection_id: usize, subscriptions: Vec<SubscriptionKey>) {
        self.publish(MarketEvent::Subscriptions(subscriptions));
    }

    fn notify(&self, event: MarketEvent) {
        self.publish(event);
    }
}

struct Command {
    text: String,
    done: oneshot::Sender<Result<()>>,
}

#[derive(Debug)]
struct Session {
    generation: u64,
    outbound: mpsc::Sender<OutboundFrame>,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct State {
    lifecycle: LifecycleState,
    token: Option<BootstrapToken>,
    connect_id: Option<String>,
    ping_interval: Duration,
    subscriptions: Vec<Subscription>,
    attempts: HashMap<SubscriptionKey, AttemptState>,
    /// Rolled back and waiting for their retry
    retrying: HashSet<SubscriptionKey>,
    /// Removed locally, unsubscribe ack still outstanding
    unsubscribing: HashSet<SubscriptionKey>,
    last_heartbeat_ack: Option<Instant>,
    closed_by_caller: bool,
    session: Option<Session>,
    generation: u64,
    next_attempt: u64,
}

struct Inner {
    id: usize,
    config: StreamConfig,
    provider: Arc<dyn TokenProvider>,
    transport: Arc<dyn Transport>,
    router: MessageRouter,
    observer: Arc<dyn ConnectionObserver>,
    heartbeat: Scheduler,
    commands: mpsc::UnboundedSender<Command>,
    state: Mutex<State>,
}

/// One socket to the venue and the subscriptions it carries.
///
/// Must be created inside a tokio runtime. Clones share the same socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub fn new(
        id: usize,
        config: StreamConfig,
        provider: Arc<dyn TokenProvider>,
        transport: Arc<dyn Transport>,
        bus: EventBus,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        let (commands, queue) = mpsc::unbounded_channel();
        let router = MessageRouter::new(bus, config.wait_timeout);
        let inner = Arc::new(Inner {
            id,
            provider,
            transport,
            router,
            observer,
            heartbeat: Scheduler::new("heartbeat"),
            commands,
            state: Mutex::new(State {
                lifecycle: LifecycleState::Disconnected,
                token: None,
                connect_id: None,
                ping_interval: Duration::ZERO,
                subscriptions: Vec::new(),
                attempts: HashMap::new(),
                retrying: HashSet::new(),
                unsubscribing: HashSet::new(),
                last_heartbeat_ack: None,
                closed_by_caller: false,
                session: None,
                generation: 0,
                next_attempt: 0,
            }),
            config,
        });

        tokio::spawn(run_command_queue(Arc::downgrade(&inner), queue));
        Self { inner }
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn router(&self) -> &MessageRouter {
        &self.inner.router
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().lifecycle
    }

    pub fn is_open(&self) -> bool {
        self.state() == LifecycleState::Open
    }

    pub fn is_connecting(&self) -> bool {
        self.state().is_connecting()
    }

    pub fn connect_id(&self) -> Option<String> {
        self.lock().connect_id.clone()
    }

    pub fn public_token(&self) -> Option<BootstrapToken> {
        self.lock().token.clone()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionKey> {
        self.lock()
            .subscriptions
            .iter()
            .map(|subscription| subscription.key.clone())
            .collect()
    }

    pub fn subscription_records(&self) -> Vec<Subscription> {
        self.lock().subscriptions.clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Held keys plus rolled-back-awaiting-retry; used for capacity decisions.
    pub fn load(&self) -> usize {
        let state = self.lock();
        held_count(&state) + state.retrying.len()
    }

    /// Whether this connection owns `key`, including during a retry window
    /// and while an unsubscribe for it is unconfirmed.
    pub fn holds(&self, key: &SubscriptionKey) -> bool {
        let state = self.lock();
        state.retrying.contains(key)
            || state.unsubscribing.contains(key)
            || state.subscriptions.iter().any(|sub| &sub.key == key)
    }

    pub fn is_unsubscribing(&self, key: &SubscriptionKey) -> bool {
        self.lock().unsubscribing.contains(key)
    }

    pub fn attempt_state(&self, key: &SubscriptionKey) -> Option<AttemptState> {
        self.lock().attempts.get(key).copied()
    }

    pub fn last_heartbeat_ack(&self) -> Option<Instant> {
        self.lock().last_heartbeat_ack
    }

    /// `false` once no pong arrived for two ping intervals. Connections that
    /// are still bootstrapping get the benefit of the doubt.
    pub fn received_pong_recently(&self) -> bool {
        let state = self.lock();
        if state.lifecycle.is_connecting() {
            return true;
        }
        let window = state.ping_interval.saturating_mul(2);
        state
            .last_heartbeat_ack
            .is_some_and(|at| at.elapsed() <= window)
    }

    /// Bootstrap, open the socket and wait for the welcome frame.
    ///
    /// No-op while already open or connecting.
    pub async fn connect(&self) -> Result<()> {
        {
            let state = self.lock();
            match state.lifecycle {
                LifecycleState::Closing => return Err(closed_by_caller_error()),
                lifecycle if lifecycle == LifecycleState::Open || lifecycle.is_connecting() => {
                    debug!(connection_id = self.inner.id, ?lifecycle, "connect ignored");
                    return Ok(());
                }
                _ => {}
            }
        }
        self.connect_attempt(false).await
    }

    async fn connect_attempt(&self, reconnecting: bool) -> Result<()> {
        {
            let mut state = self.lock();
            if state.closed_by_caller {
                return Err(closed_by_caller_error());
            }
            state.lifecycle = LifecycleState::Bootstrapping;
        }

        let fetched = self.inner.provider.fetch_token().await;
        if self.is_closed_by_caller() {
            return Err(self.abandon_connect("token fetch"));
        }
        let token = match fetched {
            Ok(token) if !token.token.is_empty() => token,
            Ok(_) => return Err(self.fail_connect(KucoinError::InvalidToken, reconnecting)),
            Err(err) => return Err(self.fail_connect(err, reconnecting)),
        };

        let connect_id = self.generate_connect_id();
        let url = match transport_url(&token, &connect_id) {
            Ok(url) => url,
            Err(err) => return Err(self.fail_connect(err, reconnecting)),
        };
        let ping_interval = token.ping_interval;
        {
            let mut state = self.lock();
            if state.closed_by_caller {
                drop(state);
                return Err(self.abandon_connect("token fetch"));
            }
            state.lifecycle = LifecycleState::SocketOpening;
            state.ping_interval = ping_interval;
            state.token = Some(token);
            state.connect_id = Some(connect_id.clone());
        }

        let channels = match self.inner.transport.open(url.as_str()).await {
            Ok(channels) => channels,
            Err(err) => {
                warn!(connection_id = self.inner.id, error = %err, "socket open failed");
                if self.mark_disconnected() {
                    self.inner.observer.notify_error(&err);
                    self.schedule_reconnect();
                }
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let generation = {
            let mut state = self.lock();
            if state.closed_by_caller {
                None
            } else {
                state.generation += 1;
                state.lifecycle = LifecycleState::AwaitingWelcome;
                state.session = Some(Session {
                    generation: state.generation,
                    outbound: channels.outbound,
                    cancel: cancel.clone(),
                });
                Some(state.generation)
            }
        };
        // The unused channels drop here, which closes the socket
        let Some(generation) = generation else {
            return Err(self.abandon_connect("socket open"));
        };
        let welcome = self
            .inner
            .router
            .register_wait(MessageType::Welcome.as_str(), &connect_id);
        tokio::spawn(self.clone().read_loop(generation, channels.inbound, cancel));

        if !welcome.wait().await {
            let session = self.lock().session.take();
            if let Some(session) = session {
                session.cancel.cancel();
            }
            if self.is_closed_by_caller() {
                return Err(self.abandon_connect("welcome"));
            }
            return Err(self.fail_connect(KucoinError::NoWelcome, reconnecting));
        }

        let replay: Vec<SubscriptionKey> = {
            let mut state = self.lock();
            if state.closed_by_caller {
                drop(state);
                return Err(self.abandon_connect("welcome"));
            }
            state.lifecycle = LifecycleState::Open;
            state.last_heartbeat_ack = Some(Instant::now());
            state.attempts.clear();
            state
                .subscriptions
                .drain(..)
                .map(|subscription| subscription.key)
                .collect()
        };
        self.start_heartbeat(ping_interval);
        info!(
            connection_id = self.inner.id,
            generation,
            replay = replay.len(),
            ping_interval_ms = ping_interval.as_millis() as u64,
            "ws connected"
        );

        if reconnecting {
            self.inner.router.clear_cache();
        }
        if !replay.is_empty() {
            self.notify_subscriptions_changed();
            for key in replay {
                self.subscribe(key);
            }
        }
        Ok(())
    }

    fn fail_connect(&self, err: KucoinError, reconnecting: bool) -> KucoinError {
        warn!(connection_id = self.inner.id, error = %err, reconnecting, "connect failed");
        if self.mark_disconnected() {
            self.inner.observer.notify_error(&err);
            if reconnecting {
                self.schedule_reconnect();
            }
        }
        err
    }

    /// `close_connection` ran while connecting; the state stays `Closing`.
    fn abandon_connect(&self, stage: &str) -> KucoinError {
        info!(connection_id = self.inner.id, stage, "connect abandoned, closed by caller");
        closed_by_caller_error()
    }

    /// Moves to `Disconnected` unless the caller closed the connection.
    fn mark_disconnected(&self) -> bool {
        let mut state = self.lock();
        if state.closed_by_caller {
            return false;
        }
        state.lifecycle = LifecycleState::Disconnected;
        true
    }

    fn is_closed_by_caller(&self) -> bool {
        self.lock().closed_by_caller
    }

    fn generate_connect_id(&self) -> String {
        let mut bytes = vec![0u8; self.inner.config.connect_id_bytes];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Track `key` and subscribe in the background. Returns `false` if the key
    /// is already tracked or the connection was closed by the caller.
    pub fn subscribe(&self, key: SubscriptionKey) -> bool {
        let attempt = {
            let mut state = self.lock();
            if state.closed_by_caller || state.subscriptions.iter().any(|sub| sub.key == key) {
                return false;
            }
            state.retrying.remove(&key);
            state.next_attempt += 1;
            let attempt = state.next_attempt;
            state.subscriptions.push(Subscription {
                key: key.clone(),
                created_at: Instant::now(),
                attempt,
            });
            state.attempts.insert(key.clone(), AttemptState::Pending);
            attempt
        };

        self.notify_subscriptions_changed();
        tokio::spawn(self.clone().drive_subscribe(key, attempt));
        true
    }

    async fn drive_subscribe(self, key: SubscriptionKey, attempt: u64) {
        loop {
            let open = {
                let state = self.lock();
                if state.closed_by_caller || !tracks_attempt(&state, &key, attempt) {
                    return;
                }
                state.lifecycle == LifecycleState::Open
            };
            if open {
                break;
            }
            self.inner.observer.notify(MarketEvent::SocketNotReady(format!(
                "Socket not ready, retrying subscription {key}"
            )));
            tokio::time::sleep(self.inner.config.subscription_retry_delay).await;
        }

        let acked = self.send_tracked(WireMessage::subscribe(new_message_id(), key.topic())).await;

        if acked {
            let mut state = self.lock();
            if tracks_attempt(&state, &key, attempt) {
                state.attempts.insert(key.clone(), AttemptState::Committed);
                debug!(connection_id = self.inner.id, subscription = %key, "subscription acked");
            }
            return;
        }

        let rolled_back = {
            let mut state = self.lock();
            if tracks_attempt(&state, &key, attempt) {
                state.subscriptions.retain(|sub| sub.key != key);
                state.attempts.insert(key.clone(), AttemptState::RolledBack);
                state.retrying.insert(key.clone());
                true
            } else {
                false
            }
        };
        if !rolled_back {
            return;
        }

        warn!(connection_id = self.inner.id, subscription = %key, "subscription not acked, rolled back");
        self.notify_subscriptions_changed();
        tokio::time::sleep(self.inner.config.subscription_retry_delay).await;

        let still_wanted = {
            let mut state = self.lock();
            !state.closed_by_caller && state.retrying.remove(&key)
        };
        if still_wanted {
            self.inner
                .observer
                .notify(MarketEvent::RetrySubscription(format!("Retrying subscription {key}")));
            self.subscribe(key);
        }
    }

    /// Unsubscribe and wait for the ack. `Ok(false)` means the key was not
    /// held, or the ack never came and the subscription was restored.
    pub async fn unsubscribe(&self, key: &SubscriptionKey) -> Result<bool> {
        let removed = {
            let mut state = self.lock();
            if state.lifecycle != LifecycleState::Open {
                drop(state);
                let err = KucoinError::NotConnected;
                self.inner.observer.notify_error(&err);
                return Err(err);
            }
            let Some(position) = state.subscriptions.iter().position(|sub| &sub.key == key) else {
                let cancelled_retry = state.retrying.remove(key);
                if cancelled_retry {
                    state.attempts.remove(key);
                }
                return Ok(cancelled_retry);
            };
            state.attempts.remove(key);
            state.unsubscribing.insert(key.clone());
            state.subscriptions.remove(position)
        };
        self.notify_subscriptions_changed();

        let acked = self
            .send_tracked(WireMessage::unsubscribe(new_message_id(), key.topic()))
            .await;
        if acked {
            self.lock().unsubscribing.remove(key);
            self.inner.router.clear_snapshot(key);
            return Ok(true);
        }

        warn!(connection_id = self.inner.id, subscription = %key, "unsubscribe not acked, restoring");
        {
            let mut state = self.lock();
            state.unsubscribing.remove(key);
            // A subscribe issued during the window already re-added the key
            if !state.subscriptions.iter().any(|sub| &sub.key == key) {
                state.attempts.insert(key.clone(), AttemptState::Committed);
                state.subscriptions.push(removed);
            }
        }
        self.notify_subscriptions_changed();
        Ok(false)
    }

    /// Send through the command queue and wait for the matching ack.
    async fn send_tracked(&self, frame: WireMessage) -> bool {
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(err) => {
                warn!(connection_id = self.inner.id, error = %err, "command encode failed");
                return false;
            }
        };
        let ack = self
            .inner
            .router
            .register_wait(MessageType::Ack.as_str(), &frame.id);
        log_command(self.inner.id, &frame);

        match self.enqueue(text).await {
            Ok(()) => ack.wait().await,
            Err(err) => {
                ack.cancel();
                debug!(connection_id = self.inner.id, error = %err, kind = %frame.kind, "command send failed");
                false
            }
        }
    }

    async fn enqueue(&self, text: String) -> Result<()> {
        let (done, result) = oneshot::channel();
        self.inner
            .commands
            .send(Command { text, done })
            .map_err(|_| KucoinError::SendFailed("command queue closed".to_string()))?;
        result
            .await
            .map_err(|_| KucoinError::SendFailed("command dropped".to_string()))?
    }

    /// Write one frame to the current socket, bounded by the send timeout.
    async fn write_frame(&self, text: String) -> Result<()> {
        let outbound = self
            .lock()
            .session
            .as_ref()
            .map(|session| session.outbound.clone())
            .ok_or_else(|| KucoinError::SendFailed("socket not open".to_string()))?;

        let send_timeout = self.inner.config.send_timeout;
        let write = async move {
            let (sent, written) = oneshot::channel();
            outbound
                .send(OutboundFrame { text, sent })
                .await
                .map_err(|_| KucoinError::SendFailed("socket closed".to_string()))?;
            written
                .await
                .map_err(|_| KucoinError::SendFailed("socket closed".to_string()))?
        };

        tokio::time::timeout(send_timeout, write)
            .await
            .map_err(|_| KucoinError::Timeout {
                millis: send_timeout.as_millis() as u64,
            })?
    }

    fn start_heartbeat(&self, period: Duration) {
        if period.is_zero() {
            warn!(connection_id = self.inner.id, "ping interval is zero, heartbeat disabled");
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        self.inner.heartbeat.start(period, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    Connection { inner }.send_ping().await;
                }
            }
            .boxed()
        });
    }

    async fn send_ping(&self) {
        let frame = WireMessage::ping(new_message_id());
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(err) => {
                warn!(connection_id = self.inner.id, error = %err, "ping encode failed");
                return;
            }
        };
        let pong = self
            .inner
            .router
            .register_wait(MessageType::Pong.as_str(), &frame.id);

        if let Err(err) = self.enqueue(text).await {
            pong.cancel();
            debug!(connection_id = self.inner.id, error = %err, "ping send failed");
            return;
        }
        if pong.wait().await {
            self.lock().last_heartbeat_ack = Some(Instant::now());
        } else {
            debug!(connection_id = self.inner.id, "pong missed");
        }
    }

    /// Close for good. Fails while subscriptions remain.
    pub fn close_connection(&self) -> Result<()> {
        let session = {
            let mut state = self.lock();
            let active = held_count(&state);
            if active > 0 {
                drop(state);
                let err = KucoinError::ActiveSubscriptions(active);
                self.inner.observer.notify_error(&err);
                return Err(err);
            }
            state.closed_by_caller = true;
            state.retrying.clear();
            state.lifecycle = LifecycleState::Closing;
            state.session.take()
        };

        self.inner.heartbeat.stop();
        if let Some(session) = session {
            session.cancel.cancel();
        }
        info!(connection_id = self.inner.id, "ws closed by caller");
        Ok(())
    }

    /// Drop the socket regardless of subscriptions; the reconnect path
    /// brings it back with the same subscriptions.
    pub fn force_close_connection(&self) {
        let cancel = {
            let state = self.lock();
            if state.closed_by_caller || state.lifecycle.is_connecting() {
                return;
            }
            state.session.as_ref().map(|session| session.cancel.clone())
        };

        warn!(connection_id = self.inner.id, "force closing ws");
        match cancel {
            Some(cancel) => cancel.cancel(),
            None => {
                self.inner.heartbeat.stop();
                self.schedule_reconnect();
            }
        }
    }

    async fn read_loop(
        self,
        generation: u64,
        mut inbound: mpsc::Receiver<TransportEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = inbound.recv() => match event {
                    Some(TransportEvent::Frame(text)) => self.route(&text),
                    Some(TransportEvent::Error(message)) => {
                        self.inner.observer.notify_error(&KucoinError::WebSocket(message));
                    }
                    None => break,
                },
            }
        }
        self.handle_socket_closed(generation);
    }

    fn route(&self, raw: &str) {
        let Err(err) = self.inner.router.process_message(raw) else {
            return;
        };
        if err.is_fatal() {
            self.inner.observer.notify_error(&err);
        }

        let count = ROUTE_FAIL_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
        if count < ROUTE_FAIL_LOG_LIMIT {
            debug!(
                connection_id = self.inner.id,
                sample_index = count + 1,
                sample_limit = ROUTE_FAIL_LOG_LIMIT,
                error = %err,
                message = %truncate_for_log(raw, RAW_LOG_MAX_BYTES),
                "ws frame not routed"
            );
        }
    }

    fn handle_socket_closed(&self, generation: u64) {
        let subscriptions = {
            let mut state = self.lock();
            let current = state
                .session
                .as_ref()
                .is_some_and(|session| session.generation == generation);
            // The connect path owns sockets that never got their welcome
            if !current || state.lifecycle == LifecycleState::AwaitingWelcome {
                return;
            }
            state.session = None;
            if state.closed_by_caller {
                state.lifecycle = LifecycleState::Closing;
                None
            } else {
                Some(state.subscriptions.len())
            }
        };

        self.inner.heartbeat.stop();
        match subscriptions {
            Some(count) => {
                warn!(connection_id = self.inner.id, generation, subscriptions = count, "ws closed unexpectedly");
                self.schedule_reconnect();
            }
            None => info!(connection_id = self.inner.id, generation, "ws closed"),
        }
    }

    fn schedule_reconnect(&self) {
        {
            let mut state = self.lock();
            if state.closed_by_caller {
                return;
            }
            state.lifecycle = LifecycleState::Reconnecting;
        }
        let connection = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(connection.inner.config.reconnect_delay).await;
            let count = {
                let state = connection.lock();
                if state.closed_by_caller || state.lifecycle != LifecycleState::Reconnecting {
                    return;
                }
                state.subscriptions.len()
            };
            connection.inner.observer.notify(MarketEvent::Reconnect(format!(
                "Reconnect with {count} subscriptions"
            )));
            if let Err(err) = connection.connect_attempt(true).await {
                debug!(connection_id = connection.inner.id, error = %err, "reconnect attempt failed");
            }
        });
    }

    fn notify_subscriptions_changed(&self) {
        let subscriptions = self.subscriptions();
        self.inner
            .observer
            .notify_subscriptions_changed(self.inner.id, subscriptions);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("lifecycle", &state.lifecycle)
            .field("subscriptions", &state.subscriptions.len())
            .field("retrying", &state.retrying.len())
            .finish()
    }
}

/// Single-slot outbound queue: one frame in flight per connection.
async fn run_command_queue(inner: Weak<Inner>, mut queue: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = queue.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let result = Connection { inner }.write_frame(command.text).await;
        let _ = command.done.send(result);
    }
}

/// Tracked keys plus those whose unsubscribe is still unconfirmed.
fn held_count(state: &State) -> usize {
    let pending = state
        .unsubscribing
        .iter()
        .filter(|key| !state.subscriptions.iter().any(|sub| &sub.key == *key))
        .count();
    state.subscriptions.len() + pending
}

fn closed_by_caller_error() -> KucoinError {
    KucoinError::WebSocket("connection was closed by the caller".to_string())
}

fn tracks_attempt(state: &State, key: &SubscriptionKey, attempt: u64) -> bool {
    state
        .subscriptions
        .iter()
        .any(|sub| &sub.key == key && sub.attempt == attempt)
}

/// `<endpoint>?token=..&connectId=..`. A host-only endpoint gains the root
/// path, so `wss://x` becomes `wss://x/?token=..`; both address the same socket.
fn transport_url(token: &BootstrapToken, connect_id: &str) -> Result<Url> {
    Ok(Url::parse_with_params(
        &token.endpoint,
        &[("token", token.token.as_str()), ("connectId", connect_id)],
    )?)
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

fn log_command(connection_id: usize, frame: &WireMessage) {
    let count = COMMAND_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count >= COMMAND_LOG_LIMIT {
        return;
    }
    info!(
        connection_id,
        sample_index = count + 1,
        sample_limit = COMMAND_LOG_LIMIT,
        kind = %frame.kind,
        topic = frame.topic.as_deref().unwrap_or_default(),
        "ws command sent"
    );
}
