use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, Mutex};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use ctcwallet::{
    address, builder::Recipient, config, crypto, keys, metrics, node::HttpNodeClient, selection::Destination, storage::Store,
    sync, transaction::NATIVE_TOKEN, wallet::Wallet,
};

#[derive(Parser)]
#[command(author, version, about = "ctcwallet: confidential-transaction light wallet")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// File holding the root secret as hex or a 25-word mnemonic; `CTC_ROOT_SECRET` is used otherwise
    #[arg(long)]
    root_key_file: Option<String>,

    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the main address or a subaddress
    Address {
        #[arg(long, default_value_t = 0)]
        index: u32,
    },
    /// Scan new blocks once, or keep scanning with --watch
    Refresh {
        #[arg(long)]
        watch: bool,
    },
    Balance,
    /// Pay a stealth address or a 0x account and submit the transactions
    Transfer {
        #[arg(long)]
        to: String,
        /// Atomic units
        #[arg(long)]
        amount: u128,
        /// Spend only from these subaddresses
        #[arg(long = "subaddr")]
        subaddrs: Vec<u32>,
    },
    /// Reveal the proof key of a sent transaction
    ProofKey {
        #[arg(long)]
        tx: String,
        #[arg(long)]
        addr: String,
    },
    /// Check a proof key and print the amount it proves
    CheckProof {
        #[arg(long)]
        tx: String,
        #[arg(long)]
        addr: String,
        #[arg(long)]
        key: String,
    },
    /// Forget every owned output and scan again from height 0
    Rescan,
    /// Print the 25-word mnemonic of the root secret
    Mnemonic,
}

fn load_config(path: &str) -> anyhow::Result<config::Config> {
    match config::load(path) {
        Ok(c) => Ok(c),
        Err(e1) => {
            eprintln!("⚠️  Could not read config from '{}': {:#}", path, e1);
            // Embedded default config lets the binary run standalone
            const EMBEDDED_CONFIG: &str = include_str!("../config.toml");
            config::load_from_str(EMBEDDED_CONFIG)
                .map_err(|e2| anyhow!("failed to load configuration: {} / {}", e1, e2))
        }
    }
}

fn root_secret(file: Option<&str>) -> anyhow::Result<Zeroizing<crypto::Key>> {
    let text = Zeroizing::new(match file {
        Some(p) => std::fs::read_to_string(p).with_context(|| format!("🔑 couldn’t read root key file {p}"))?,
        None => std::env::var("CTC_ROOT_SECRET").context("🔑 set CTC_ROOT_SECRET or pass --root-key-file")?,
    });
    let key = if text.split_whitespace().count() > 1 {
        keys::words_to_key(&text).context("🔑 root mnemonic rejected")?
    } else {
        crypto::key_from_hex(&text).context("🔑 root secret must be 32 bytes of hex or a 25-word mnemonic")?
    };
    Ok(Zeroizing::new(key))
}

fn parse_hash(s: &str) -> anyhow::Result<crypto::Key> {
    crypto::key_from_hex(s).with_context(|| format!("invalid 32-byte hex '{s}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    let root = root_secret(cli.root_key_file.as_deref())?;
    if matches!(cli.cmd, Some(Cmd::Mnemonic)) {
        println!("🔑 {}", Zeroizing::new(keys::key_to_words(&root)).as_str());
        return Ok(());
    }

    let store = Arc::new(Store::open(&cfg.storage.path)?);
    println!("🗄️  Wallet store opened at '{}'", cfg.storage.path);
    let node = Arc::new(HttpNodeClient::new(&cfg.node.url, cfg.node.timeout())?);
    let external = cfg.wallet.account.as_deref().map(address::parse_external).transpose()?;
    let mut wallet = Wallet::open(store.clone(), node, root, external, cfg.wallet.clone())?;

    match cli.cmd.unwrap_or(Cmd::Refresh { watch: false }) {
        Cmd::Address { index } => {
            println!("📬 {}", wallet.address(index)?);
        }
        Cmd::Refresh { watch: false } => {
            let report = wallet.refresh_once().await?;
            println!(
                "🔄 Scanned {} blocks up to {} ({} found, {} spent)",
                report.blocks, report.remote_height, report.found, report.spent
            );
        }
        Cmd::Refresh { watch: true } => {
            let m = metrics::WalletMetrics::new()?;
            metrics::serve(cfg.metrics.clone(), m.clone())?;
            let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
            let wallet = Arc::new(Mutex::new(wallet));
            let mut handle = sync::spawn(
                wallet.clone(),
                m,
                std::time::Duration::from_secs(cfg.wallet.refresh_secs),
                shutdown_rx,
            );
            let stopped = tokio::select! {
                _ = signal::ctrl_c() => false,
                _ = &mut handle => true,
            };
            if stopped {
                eprintln!("🔥 Refresh task stopped, see the log for the cause");
            } else {
                println!("🛑 Shutting down");
                let _ = shutdown_tx.send(());
                let _ = handle.await;
            }
            wallet.lock().await.close()?;
            return Ok(());
        }
        Cmd::Balance => {
            println!("💰 Balance: {} (height {})", wallet.balance(&NATIVE_TOKEN), wallet.local_height());
            for (sub, amount) in wallet.balances(&NATIVE_TOKEN) {
                println!("   #{sub:<4} {amount}");
            }
        }
        Cmd::Transfer { to, amount, subaddrs } => {
            let dest = if to.starts_with("0x") {
                Destination::Account { to: address::parse_external(&to)?, amount, data: Vec::new() }
            } else {
                let parsed = address::decode_address(&to)?;
                Destination::Utxo {
                    address: parsed.address,
                    is_subaddress: parsed.is_subaddress,
                    amount,
                    remark: [0u8; 32],
                    is_change: false,
                }
            };
            let built = wallet.create_utxo_transactions(&subaddrs, vec![dest], NATIVE_TOKEN, Vec::new()).await?;
            for b in &built {
                let hash = wallet.submit(&b.tx).await?;
                println!("✅ Sent {} (fee {})", hex::encode(hash), b.tx.fee);
            }
        }
        Cmd::ProofKey { tx, addr } => {
            let key = wallet.get_proof_key(&parse_hash(&tx)?, &Recipient::parse(&addr)?)?;
            println!("🧾 {}", hex::encode(key));
        }
        Cmd::CheckProof { tx, addr, key } => {
            let tx = wallet.get_transaction(&parse_hash(&tx)?)?;
            let amount = wallet.check_proof_key(&tx, &Recipient::parse(&addr)?, &parse_hash(&key)?)?;
            println!("✅ Proof valid: {amount}");
        }
        Cmd::Rescan => {
            wallet.rescan()?;
            let report = wallet.refresh_once().await?;
            println!("🔄 Rescanned {} blocks", report.blocks);
        }
        // printed before the store is opened
        Cmd::Mnemonic => {}
    }
    wallet.close()?;
    Ok(())
}
