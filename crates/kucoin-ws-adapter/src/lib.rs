/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public KuCoin market-data adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod http;
pub mod types;
pub mod ws;

// Re-export commonly used types from http
pub use http::{
    ClientConfig,
    KucoinClient,
    KucoinError,
    Result,
    TokenProvider,
};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{
    AttemptState,
    Connection,
    ConnectionPool,
    EventListener,
    LifecycleState,
    MarketEvent,
    StreamConfig,
    SubscriptionKey,
    Transport,
    WsTransport,
};
