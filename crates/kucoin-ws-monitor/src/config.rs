/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed monitor configuration and the adapter's StreamConfig
[POS]:    Configuration layer - what to watch and how the pool behaves
[UPDATE]: When adding new configuration options
*/

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use kucoin_ws_adapter::{CandleInterval, StreamConfig};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the monitor
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Pool tuning; every field falls back to the adapter default
    #[serde(default)]
    pub stream: StreamSettings,
    /// Canonical symbols, e.g. "BTC/USDT"
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub candles: Vec<CandleWatch>,
}

/// One candle stream to watch
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CandleWatch {
    pub symbol: String,
    /// Canonical interval: 1m, 3m, 15m, 30m, 1h, 2h, 4h, 6h, 8h, 12h, 1d, 1w
    pub interval: String,
}

/// Millisecond-based mirror of [`StreamConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamSettings {
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_subscription_retry_delay_ms")]
    pub subscription_retry_delay_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_connection: usize,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_ticker_stale_after_ms")]
    pub ticker_stale_after_ms: u64,
    #[serde(default = "default_candle_stale_multiplier")]
    pub candle_stale_multiplier: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            subscription_retry_delay_ms: default_subscription_retry_delay_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_subscriptions_per_connection: default_max_subscriptions(),
            health_check_interval_ms: default_health_check_interval_ms(),
            ticker_stale_after_ms: default_ticker_stale_after_ms(),
            candle_stale_multiplier: default_candle_stale_multiplier(),
        }
    }
}

impl StreamSettings {
    pub fn to_stream_config(&self) -> StreamConfig {
        StreamConfig {
            wait_timeout: Duration::from_millis(self.wait_timeout_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            subscription_retry_delay: Duration::from_millis(self.subscription_retry_delay_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            max_subscriptions_per_connection: self.max_subscriptions_per_connection,
            health_check_interval: Duration::from_millis(self.health_check_interval_ms),
            ticker_stale_after: Duration::from_millis(self.ticker_stale_after_ms),
            candle_stale_multiplier: self.candle_stale_multiplier,
            ..StreamConfig::default()
        }
    }
}

fn default_wait_timeout_ms() -> u64 {
    2_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_subscription_retry_delay_ms() -> u64 {
    2_000
}

fn default_send_timeout_ms() -> u64 {
    250
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

fn default_max_subscriptions() -> usize {
    300
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

fn default_ticker_stale_after_ms() -> u64 {
    60_000
}

fn default_candle_stale_multiplier() -> u32 {
    2
}

impl MonitorConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|content| Self::from_yaml(&content))
            .with_context(|| format!("load config {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tickers.is_empty() && self.candles.is_empty() {
            bail!("nothing to watch: configure at least one ticker or candle");
        }
        for watch in &self.candles {
            CandleInterval::from_canonical(&watch.interval)
                .with_context(|| format!("candle stream for {}", watch.symbol))?;
        }
        self.stream
            .to_stream_config()
            .validate()
            .context("stream settings")?;
        Ok(())
    }

    pub fn subscription_count(&self) -> usize {
        self.tickers.len() + self.candles.len()
    }
}
