/*
[INPUT]:  Raw KuCoin ticker/candle payloads and bootstrap server descriptors
[OUTPUT]: Canonical Ticker / Candle values and the BootstrapToken handed to connections
[POS]:    Data layer - value objects emitted to subscribers
[UPDATE]: When the canonical ticker/candle shape changes
*/

use std::str::FromStr;
use std::time::Duration;

use chrono::DateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::http::{KucoinError, Result};

/// Credential and endpoint needed to open one streaming transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapToken {
    pub token: String,
    pub endpoint: String,
    pub ping_interval: Duration,
}

/// Ticker payload as pushed on `/market/ticker:<SYMBOL>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTicker {
    #[serde(default)]
    pub best_ask: String,
    #[serde(default)]
    pub best_ask_size: String,
    #[serde(default)]
    pub best_bid: String,
    #[serde(default)]
    pub best_bid_size: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub sequence: String,
    #[serde(default)]
    pub size: String,
    pub time: i64,
}

/// Normalized ticker. `high`/`low` mirror best ask/bid; the stream carries no
/// session extremes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub info: RawTicker,
    pub timestamp: i64,
    pub datetime: String,
    pub high: Decimal,
    pub low: Decimal,
    pub ask: Decimal,
    pub bid: Decimal,
    pub last: Decimal,
    pub close: Decimal,
}

impl Ticker {
    pub fn from_raw(symbol: &str, raw: RawTicker) -> Result<Self> {
        let ask = decimal_or_zero(&raw.best_ask)?;
        let bid = decimal_or_zero(&raw.best_bid)?;
        let last = decimal_or_zero(&raw.price)?;

        Ok(Self {
            symbol: symbol.to_string(),
            timestamp: raw.time,
            datetime: utc_string(raw.time),
            high: ask,
            low: bid,
            ask,
            bid,
            last,
            close: last,
            info: raw,
        })
    }
}

/// One OHLCV bar built from the venue tuple
/// `[time, open, close, high, low, volume, turnover]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub info: Vec<String>,
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Bar open time, milliseconds since epoch.
    pub timestamp: i64,
}

impl Candle {
    pub fn from_raw(symbol: &str, raw: Vec<String>) -> Result<Self> {
        if raw.len() < 6 {
            return Err(KucoinError::InvalidResponse(format!(
                "candle tuple has {} fields, expected at least 6",
                raw.len()
            )));
        }

        let start_secs: i64 = raw[0].trim().parse().map_err(|_| {
            KucoinError::InvalidResponse(format!("invalid candle time: {}", raw[0]))
        })?;

        Ok(Self {
            symbol: symbol.to_string(),
            open: decimal_or_zero(&raw[1])?,
            close: decimal_or_zero(&raw[2])?,
            high: decimal_or_zero(&raw[3])?,
            low: decimal_or_zero(&raw[4])?,
            volume: decimal_or_zero(&raw[5])?,
            timestamp: start_secs.saturating_mul(1_000),
            info: raw,
        })
    }
}

fn decimal_or_zero(raw: &str) -> Result<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(raw)
        .map_err(|err| KucoinError::InvalidResponse(format!("invalid decimal {raw:?}: {err}")))
}

fn utc_string(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|at| at.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        .unwrap_or_default()
}

/// `BTC/USDT` -> `BTC-USDT`
pub fn to_venue_symbol(symbol: &str) -> String {
    symbol.replacen('/', "-", 1)
}

/// `BTC-USDT` -> `BTC/USDT`
pub fn from_venue_symbol(symbol: &str) -> String {
    symbol.replacen('-', "/", 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn dec(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    #[test]
    fn ticker_normalizes_best_quotes() {
        let raw: RawTicker = serde_json::from_value(json!({
            "bestAsk": "67232.9",
            "bestAskSize": "0.01",
            "bestBid": "67232.8",
            "bestBidSize": "1.2",
            "price": "67232.85",
            "sequence": "1550467636704",
            "size": "0.0004",
            "time": 1_767_225_600_000_i64
        }))
        .expect("raw ticker");

        let ticker = Ticker::from_raw("BTC/USDT", raw.clone()).expect("ticker");

        assert_eq!(ticker.symbol, "BTC/USDT");
        assert_eq!(ticker.high, dec("67232.9"));
        assert_eq!(ticker.ask, dec("67232.9"));
        assert_eq!(ticker.low, dec("67232.8"));
        assert_eq!(ticker.bid, dec("67232.8"));
        assert_eq!(ticker.last, dec("67232.85"));
        assert_eq!(ticker.close, ticker.last);
        assert_eq!(ticker.timestamp, 1_767_225_600_000);
        assert_eq!(ticker.datetime, "Thu, 01 Jan 2026 00:00:00 GMT");
        assert_eq!(ticker.info, raw);
    }

    #[test]
    fn candle_reads_ohlcv_tuple_order() {
        let raw: Vec<String> = ["1767225600", "100", "105", "110", "95", "12.5", "1300"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let candle = Candle::from_raw("ETH/USDT", raw).expect("candle");

        assert_eq!(candle.open, dec("100"));
        assert_eq!(candle.close, dec("105"));
        assert_eq!(candle.high, dec("110"));
        assert_eq!(candle.low, dec("95"));
        assert_eq!(candle.volume, dec("12.5"));
        assert_eq!(candle.timestamp, 1_767_225_600_000);
    }

    #[test]
    fn short_candle_tuple_is_invalid() {
        let err = Candle::from_raw("ETH/USDT", vec!["1".to_string()]).unwrap_err();
        assert!(matches!(err, KucoinError::InvalidResponse(_)));
    }

    #[test]
    fn symbol_separator_roundtrip() {
        assert_eq!(to_venue_symbol("BTC/USDT"), "BTC-USDT");
        assert_eq!(from_venue_symbol("BTC-USDT"), "BTC/USDT");
    }
}
