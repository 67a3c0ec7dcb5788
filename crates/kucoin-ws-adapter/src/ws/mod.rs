/*
[INPUT]:  StreamConfig, token provider, transport, subscription requests
[OUTPUT]: Normalized ticker/candle events from a self-healing connection pool
[POS]:    WebSocket layer - resilience engine
[UPDATE]: When adding modules or changing the public ws surface
*/

pub mod config;
pub mod connection;
pub mod events;
pub mod message;
pub mod pool;
pub mod router;
pub mod scheduler;
pub mod subscription;
pub mod transport;

pub use config::StreamConfig;
pub use connection::{Connection, ConnectionObserver, LifecycleState};
pub use events::{EventBus, EventListener, MarketEvent};
pub use message::{MessageType, WireMessage};
pub use pool::ConnectionPool;
pub use router::{MessageRouter, PendingWait, Snapshot};
pub use scheduler::Scheduler;
pub use subscription::{AttemptState, Subscription, SubscriptionKey};
pub use transport::{OutboundFrame, Transport, TransportChannels, TransportEvent, WsTransport};
