// Config And Metrics Tests
// TOML defaults, file loading and the Prometheus exposition.

use std::time::Duration;

use tempfile::TempDir;

use ctcwallet::{config, metrics::WalletMetrics, selection};

#[test]
fn test_config_defaults() {
    println!("🧪 Testing a minimal config...");
    let cfg = config::load_from_str("[node]\n[storage]\npath = \"wallet_db\"\n").expect("minimal config");
    assert_eq!(cfg.node.url, "http://127.0.0.1:46005");
    assert_eq!(cfg.node.timeout(), Duration::from_secs(10));
    assert_eq!(cfg.storage.path, "wallet_db");
    assert_eq!(cfg.wallet.ring_size, selection::DEFAULT_RING_SIZE);
    assert_eq!(cfg.wallet.utxo_gas, selection::DEFAULT_UTXO_GAS);
    assert_eq!(cfg.wallet.max_sub_accounts, 5_000);
    assert!(!cfg.wallet.short_ecdh);
    assert!(cfg.wallet.account.is_none());
    assert_eq!(cfg.metrics.bind, "127.0.0.1:9100");
    println!("  ✅ Unset fields fall back to defaults");
}

#[test]
fn test_config_file() {
    println!("🧪 Testing config loading from disk...");
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[node]
url = "http://node:8545"
timeout_secs = 3

[storage]
path = "/var/lib/ctcwallet"

[wallet]
ring_size = 1
short_ecdh = true
account = "0x1111111111111111111111111111111111111111"
"#,
    )
    .expect("write config");

    let cfg = config::load(&path).expect("load");
    assert_eq!(cfg.node.url, "http://node:8545");
    assert_eq!(cfg.node.timeout(), Duration::from_secs(3));
    assert_eq!(cfg.wallet.ring_size, 1);
    assert!(cfg.wallet.short_ecdh);
    assert_eq!(cfg.wallet.refresh_secs, 5);
    println!("  ✅ File values override defaults");

    // : storage has no default path
    assert!(config::load_from_str("[node]\n").is_err());
    assert!(config::load(dir.path().join("missing.toml")).is_err());
}

#[test]
fn test_metrics_render() {
    println!("🧪 Testing the metrics exposition...");
    let m = WalletMetrics::new().expect("metrics");
    m.local_height.set(12);
    m.recognized.inc_by(3);
    let text = String::from_utf8(m.render().expect("render")).expect("utf8");
    assert!(text.contains("ctcwallet_local_height 12"));
    assert!(text.contains("ctcwallet_recognized_outputs_total 3"));
    println!("  ✅ Gauges and counters exported");
}
