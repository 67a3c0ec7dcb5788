/*
[INPUT]:  Timing and capacity knobs for connections and the pool
[OUTPUT]: StreamConfig shared by Connection, MessageRouter and ConnectionPool
[POS]:    WebSocket layer - configuration
[UPDATE]: When adding timers, thresholds or capacity limits
*/

use std::time::Duration;

use crate::http::{KucoinError, Result};

/// Stream engine configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Deadline for a pending ack / pong / welcome
    pub wait_timeout: Duration,
    /// Delay before reconnecting after an unexpected close
    pub reconnect_delay: Duration,
    /// Backoff for deferred or failed subscribe attempts
    pub subscription_retry_delay: Duration,
    /// Bound on a single outbound write in the command queue
    pub send_timeout: Duration,
    /// Bound on the transport handshake
    pub handshake_timeout: Duration,
    /// Random bytes hex-encoded into the connect-id
    pub connect_id_bytes: usize,
    /// Sharding ceiling per connection
    pub max_subscriptions_per_connection: usize,
    pub health_check_interval: Duration,
    /// No ticker for this long means the subscription is dead
    pub ticker_stale_after: Duration,
    /// Candle threshold is this many bar durations
    pub candle_stale_multiplier: u32,
    /// Capacity of the event broadcast channel
    pub event_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_millis(2_000),
            reconnect_delay: Duration::from_millis(5_000),
            subscription_retry_delay: Duration::from_millis(2_000),
            send_timeout: Duration::from_millis(250),
            handshake_timeout: Duration::from_millis(5_000),
            connect_id_bytes: 24,
            max_subscriptions_per_connection: 300,
            health_check_interval: Duration::from_secs(30),
            ticker_stale_after: Duration::from_secs(60),
            candle_stale_multiplier: 2,
            event_buffer: 1_024,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_subscriptions_per_connection == 0 {
            return Err(KucoinError::Config(
                "max_subscriptions_per_connection must be at least 1".to_string(),
            ));
        }
        if self.connect_id_bytes == 0 {
            return Err(KucoinError::Config("connect_id_bytes must be at least 1".to_string()));
        }
        if self.event_buffer == 0 {
            return Err(KucoinError::Config("event_buffer must be at least 1".to_string()));
        }
        if self.health_check_interval.is_zero() {
            return Err(KucoinError::Config(
                "health_check_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
