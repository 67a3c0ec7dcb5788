/*
[INPUT]:  MonitorConfig, a ConnectionPool, shutdown token
[OUTPUT]: Subscribed streams, one log line per market event, clean teardown
[POS]:    Runtime layer - drives the pool for the binary
[UPDATE]: When changing what is watched or how events are reported
*/

use std::time::Duration;

use anyhow::{Context, Result};
use kucoin_ws_adapter::{ConnectionPool, MarketEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;

const CONNECT_ATTEMPTS: u32 = 3;

pub struct Monitor {
    pool: ConnectionPool,
    config: MonitorConfig,
    shutdown: CancellationToken,
}

impl Monitor {
    pub fn new(pool: ConnectionPool, config: MonitorConfig) -> Self {
        Self {
            pool,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Connect, subscribe every configured stream, start the event logger.
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        let logger = spawn_event_logger(&self.pool, self.shutdown.clone());

        self.connect_with_retry().await?;

        let tickers = self.pool.subscribe_tickers(&self.config.tickers);
        let mut candles = 0;
        for watch in &self.config.candles {
            if self
                .pool
                .subscribe_candle(&watch.symbol, &watch.interval)
                .with_context(|| format!("subscribe candle {} {}", watch.symbol, watch.interval))?
            {
                candles += 1;
            }
        }
        info!(tickers, candles, "subscriptions requested");
        Ok(logger)
    }

    async fn connect_with_retry(&self) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.pool.connect().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < CONNECT_ATTEMPTS => {
                    let delay = Duration::from_secs(err.retry_delay().unwrap_or(1));
                    warn!(attempt, error = %err, delay_secs = delay.as_secs(), "connect failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err).context("connect to KuCoin"),
            }
        }
    }

    /// Start, block until the shutdown token fires, then tear down.
    pub async fn run(&self) -> Result<()> {
        let logger = self.start().await.context("start monitor")?;
        info!("monitor started");

        self.shutdown.cancelled().await;
        self.stop().await.context("stop monitor")?;
        if let Err(err) = logger.await {
            warn!(error = %err, "event logger ended abnormally");
        }
        Ok(())
    }

    /// Cancel the shutdown token on SIGINT, or SIGTERM on unix.
    pub fn shutdown_on_signals(&self) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                signal = wait_for_signal() => match signal {
                    Ok(name) => info!(signal = name, "shutdown signal received"),
                    Err(err) => warn!(error = %err, "signal handler failed, shutting down"),
                },
            }
            shutdown.cancel();
        })
    }

    /// Unsubscribe everything, then close the pool's connections.
    pub async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();

        match self.pool.unsubscribe_all().await {
            Ok(confirmed) => info!(confirmed, "unsubscribed"),
            Err(err) => warn!(error = %err, "unsubscribe failed"),
        }
        self.pool
            .close_connection()
            .context("close connections")?;
        info!("connections closed");
        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "SIGINT")
}

fn spawn_event_logger(pool: &ConnectionPool, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut events = pool.subscribe_events();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "event logger lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("event logger stopped");
    })
}

fn log_event(event: &MarketEvent) {
    match event {
        MarketEvent::Ticker(ticker) => info!(
            event = %event.name(),
            bid = %ticker.bid,
            ask = %ticker.ask,
            last = %ticker.last,
            datetime = %ticker.datetime,
            "ticker"
        ),
        MarketEvent::Candle { candle, .. } => info!(
            event = %event.name(),
            open = %candle.open,
            high = %candle.high,
            low = %candle.low,
            close = %candle.close,
            volume = %candle.volume,
            timestamp = candle.timestamp,
            "candle closed"
        ),
        MarketEvent::Subscriptions(list) => info!(count = list.len(), "subscriptions changed"),
        MarketEvent::Error(message) => warn!(%message, "stream error"),
        MarketEvent::Reconnect(message)
        | MarketEvent::SocketNotReady(message)
        | MarketEvent::RetrySubscription(message) => info!(event = %event.name(), %message, "stream notice"),
    }
}
