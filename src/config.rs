use serde::Deserialize;
use std::{fs, path::Path, time::Duration};
use anyhow::{Context, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub node: Node,
    pub storage: Storage,
    #[serde(default)]
    pub wallet: Wallet,
    #[serde(default)]
    pub metrics: Metrics,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Node {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Storage {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Wallet {
    #[serde(default = "default_refresh")]
    pub refresh_secs: u64,
    #[serde(default = "default_max_sub")]
    pub max_sub_accounts: u32,
    #[serde(default = "default_ring")]
    pub ring_size: usize,
    #[serde(default = "default_page")]
    pub output_page_rings: usize,
    #[serde(default = "default_utxo_gas")]
    pub utxo_gas: u64,
    #[serde(default)]
    pub short_ecdh: bool,
    /// External address the wallet is bound to; derived from the keys when unset.
    #[serde(default)]
    pub account: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metrics {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_url() -> String { "http://127.0.0.1:46005".into() }
fn default_timeout() -> u64 { 10 }
fn default_refresh() -> u64 { 5 }
fn default_max_sub() -> u32 { 5_000 }
fn default_ring() -> usize { crate::selection::DEFAULT_RING_SIZE }
fn default_page() -> usize { 2 }
fn default_utxo_gas() -> u64 { crate::selection::DEFAULT_UTXO_GAS }
fn default_bind() -> String { "127.0.0.1:9100".into() }

impl Default for Wallet {
    fn default() -> Self {
        Wallet {
            refresh_secs: default_refresh(),
            max_sub_accounts: default_max_sub(),
            ring_size: default_ring(),
            output_page_rings: default_page(),
            utxo_gas: default_utxo_gas(),
            short_ecdh: false,
            account: None,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics { bind: default_bind() }
    }
}

impl Node {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Read the TOML file at `p` and deserialize into `Config`.
/// *Adds context* so user errors print a friendlier message.
///
/// # Errors
/// * Returns an anyhow::Error if the file cannot be read or parsed.
pub fn load<P: AsRef<Path>>(p: P) -> Result<Config> {
    let text = fs::read_to_string(&p)
        .with_context(|| format!("🗂️  couldn’t read config file {}", p.as_ref().display()))?;
    load_from_str(&text)
}

pub fn load_from_str(text: &str) -> Result<Config> {
    toml::from_str(text)
        .with_context(|| "📝  invalid TOML in config file".to_string())
}
