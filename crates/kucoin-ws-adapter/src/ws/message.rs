/*
[INPUT]:  Raw WebSocket text frames / outbound command intents
[OUTPUT]: WireMessage frames and topic parsing helpers
[POS]:    WebSocket layer - message parsing and validation
[UPDATE]: When adding new message types or changing format
*/

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::http::{KucoinError, Result};
use crate::types::{CandleInterval, from_venue_symbol};

pub const TICKER_TOPIC_PREFIX: &str = "/market/ticker:";
pub const CANDLE_TOPIC_PREFIX: &str = "/market/candles:";

pub const SUBJECT_TICKER: &str = "trade.ticker";
pub const SUBJECT_CANDLE_UPDATE: &str = "trade.candles.update";
pub const SUBJECT_CANDLE_ADD: &str = "trade.candles.add";

/// Frame `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Subscribe,
    Unsubscribe,
    Ping,
    Pong,
    Ack,
    Welcome,
    Error,
    Message,
    #[serde(other)]
    Other,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Subscribe => "subscribe",
            MessageType::Unsubscribe => "unsubscribe",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Ack => "ack",
            MessageType::Welcome => "welcome",
            MessageType::Error => "error",
            MessageType::Message => "message",
            MessageType::Other => "other",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON frame exchanged in both directions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default, deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_channel: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WireMessage {
    pub fn subscribe(id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::command(MessageType::Subscribe, id.into(), topic.into())
    }

    pub fn unsubscribe(id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::command(MessageType::Unsubscribe, id.into(), topic.into())
    }

    pub fn ping(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: MessageType::Ping,
            topic: None,
            subject: None,
            private_channel: None,
            response: None,
            data: None,
        }
    }

    fn command(kind: MessageType, id: String, topic: String) -> Self {
        Self {
            id,
            kind,
            topic: Some(topic),
            subject: None,
            private_channel: Some(false),
            response: Some(true),
            data: None,
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Key under which a pending wait for this frame is registered.
    pub fn wait_key(&self) -> String {
        wait_key(self.kind.as_str(), &self.id)
    }
}

pub fn wait_key(event: &str, id: &str) -> String {
    format!("{event}-{id}")
}

/// `/market/ticker:BTC-USDT` -> `BTC/USDT`
pub fn symbol_from_ticker_topic(topic: &str) -> Result<String> {
    topic
        .strip_prefix(TICKER_TOPIC_PREFIX)
        .filter(|symbol| !symbol.is_empty())
        .map(from_venue_symbol)
        .ok_or_else(|| KucoinError::InvalidResponse(format!("unexpected ticker topic: {topic}")))
}

/// `/market/candles:BTC-USDT_1min` -> `1m`
pub fn interval_from_candle_topic(topic: &str) -> Result<CandleInterval> {
    let (_, venue_interval) = topic
        .rsplit_once('_')
        .ok_or_else(|| KucoinError::InvalidResponse(format!("unexpected candle topic: {topic}")))?;
    CandleInterval::from_venue(venue_interval)
}

fn id_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(raw) => raw,
        other => other.to_string(),
    })
}

pub(crate) fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut cut = max_len;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(cut + 3);
    out.push_str(&value[..cut]);
    out.push_str("...");
    out
}
