/*
[INPUT]:  Built kucoin-ws-monitor binary and sample configuration
[OUTPUT]: Test results for CLI startup paths that need no network
[POS]:    Integration tests - binary entry point
[UPDATE]: When CLI flags or config validation change
*/

use std::process::Command;

#[test]
fn cli_mode_with_config_and_dry_run_works() {
    let binary_path = env!("CARGO_BIN_EXE_kucoin-ws-monitor");
    let config_path = format!("{}/configs/monitor.yaml", env!("CARGO_MANIFEST_DIR"));

    let output = Command::new(binary_path)
        .arg("--config")
        .arg(config_path)
        .arg("--dry-run")
        .arg("--log-level")
        .arg("error")
        .output()
        .expect("Failed to start kucoin-ws-monitor binary");

    assert!(
        output.status.success(),
        "Process exited with non-zero status: {}\nStdout: {}\nStderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn cli_mode_rejects_missing_config() {
    let binary_path = env!("CARGO_BIN_EXE_kucoin-ws-monitor");

    let output = Command::new(binary_path)
        .arg("--config")
        .arg("/nonexistent/monitor.yaml")
        .arg("--dry-run")
        .output()
        .expect("Failed to start kucoin-ws-monitor binary");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("load config"));
}
