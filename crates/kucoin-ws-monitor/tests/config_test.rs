/*
[INPUT]:  Sample YAML configuration shipped with the crate
[OUTPUT]: Test results for config loading
[POS]:    Integration tests - configuration
[UPDATE]: When the sample config or its schema changes
*/

use std::time::Duration;

use kucoin_ws_monitor::{CandleWatch, MonitorConfig};
use tokio_test::assert_ok;

#[test]
fn sample_config_loads() {
    let path = format!("{}/configs/monitor.yaml", env!("CARGO_MANIFEST_DIR"));
    let config = assert_ok!(MonitorConfig::from_file(&path));

    assert_eq!(config.tickers, vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()]);
    assert_eq!(
        config.candles[0],
        CandleWatch {
            symbol: "BTC/USDT".to_string(),
            interval: "1m".to_string(),
        }
    );
    assert_eq!(config.subscription_count(), 4);

    let stream = config.stream.to_stream_config();
    assert_eq!(stream.health_check_interval, Duration::from_secs(30));
    assert_eq!(stream.wait_timeout, Duration::from_secs(2));
}

#[test]
fn missing_file_error_names_the_path() {
    let err = MonitorConfig::from_file("/nonexistent/monitor.yaml").unwrap_err();
    assert!(format!("{err:#}").contains("load config /nonexistent/monitor.yaml"));
}
