/*
[INPUT]:  Caller subscription requests (symbol, optional candle interval)
[OUTPUT]: Tagged SubscriptionKey, tracked Subscription records, attempt states
[POS]:    WebSocket layer - subscription identity and bookkeeping types
[UPDATE]: When adding topic kinds or changing the two-phase subscribe protocol
*/

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::http::Result;
use crate::types::{CandleInterval, to_venue_symbol};
use crate::ws::message::{CANDLE_TOPIC_PREFIX, TICKER_TOPIC_PREFIX};

/// Identity of a subscription: kind + canonical symbol (+ interval).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SubscriptionKey {
    Ticker {
        symbol: String,
    },
    Candle {
        symbol: String,
        interval: CandleInterval,
    },
}

impl SubscriptionKey {
    pub fn ticker(symbol: impl Into<String>) -> Self {
        SubscriptionKey::Ticker {
            symbol: symbol.into(),
        }
    }

    pub fn candle(symbol: impl Into<String>, interval: CandleInterval) -> Self {
        SubscriptionKey::Candle {
            symbol: symbol.into(),
            interval,
        }
    }

    /// Candle key from a canonical interval string; unknown intervals fail.
    pub fn parse_candle(symbol: &str, interval: &str) -> Result<Self> {
        Ok(Self::candle(symbol, CandleInterval::from_canonical(interval)?))
    }

    pub fn symbol(&self) -> &str {
        match self {
            SubscriptionKey::Ticker { symbol } | SubscriptionKey::Candle { symbol, .. } => symbol,
        }
    }

    pub fn interval(&self) -> Option<CandleInterval> {
        match self {
            SubscriptionKey::Ticker { .. } => None,
            SubscriptionKey::Candle { interval, .. } => Some(*interval),
        }
    }

    pub fn is_ticker(&self) -> bool {
        matches!(self, SubscriptionKey::Ticker { .. })
    }

    /// Venue topic, e.g. `/market/candles:BTC-USDT_1min`.
    pub fn topic(&self) -> String {
        match self {
            SubscriptionKey::Ticker { symbol } => {
                format!("{TICKER_TOPIC_PREFIX}{}", to_venue_symbol(symbol))
            }
            SubscriptionKey::Candle { symbol, interval } => format!(
                "{CANDLE_TOPIC_PREFIX}{}_{}",
                to_venue_symbol(symbol),
                interval.venue()
            ),
        }
    }

    /// Name of the event that carries this subscription's data.
    pub fn event_name(&self) -> String {
        match self {
            SubscriptionKey::Ticker { symbol } => format!("ticker-{symbol}"),
            SubscriptionKey::Candle { symbol, interval } => format!("candle-{symbol}-{interval}"),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.event_name())
    }
}

/// A subscription tracked by one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub key: SubscriptionKey,
    pub created_at: Instant,
    /// Identifies the subscribe attempt that added this record.
    pub(crate) attempt: u64,
}

/// Outcome of the latest subscribe attempt for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Recorded locally, ack not yet seen
    Pending,
    /// Ack received
    Committed,
    /// Ack timed out or send failed; record removed, retry scheduled
    RolledBack,
}
