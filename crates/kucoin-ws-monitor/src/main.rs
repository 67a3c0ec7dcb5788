/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Logged KuCoin market events with graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kucoin_ws_adapter::ConnectionPool;
use kucoin_ws_monitor::{Monitor, MonitorConfig};

#[derive(Parser, Debug)]
#[command(name = "kucoin-ws-monitor", version, about = "KuCoin market data stream monitor")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: PathBuf,
    /// Tracing filter, e.g. `info` or `kucoin_ws_adapter=debug`
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    /// Validate the configuration and exit
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let filter = EnvFilter::try_new(&args.log_level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    let config = MonitorConfig::from_file(&args.config_path)?;
    info!(
        config_path = %args.config_path.display(),
        tickers = config.tickers.len(),
        candles = config.candles.len(),
        dry_run = args.dry_run,
        "configuration loaded"
    );
    if args.dry_run {
        return Ok(());
    }

    let pool = ConnectionPool::new(config.stream.to_stream_config()).context("create connection pool")?;
    let monitor = Monitor::new(pool, config);
    monitor.shutdown_on_signals();
    monitor.run().await?;

    info!("monitor shutdown complete");
    Ok(())
}
