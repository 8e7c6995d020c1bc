use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::thread;

/// Refresh-loop gauges, cheap to clone into the sync task.
#[derive(Clone)]
pub struct WalletMetrics {
    pub registry: Registry,
    pub local_height: IntGauge,
    pub remote_height: IntGauge,
    pub owned_outputs: IntGauge,
    pub balance: IntGauge,
    pub recognized: IntCounter,
}

impl WalletMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        // Prefix metrics with `ctcwallet_` for better namespacing.
        let local_height = IntGauge::new("ctcwallet_local_height", "Next block height to scan")?;
        let remote_height = IntGauge::new("ctcwallet_remote_height", "Chain height reported by the node")?;
        let owned_outputs = IntGauge::new("ctcwallet_owned_outputs", "Stealth outputs owned by the wallet")?;
        let balance = IntGauge::new("ctcwallet_balance_units", "Unspent native balance in committed units")?;
        let recognized = IntCounter::new("ctcwallet_recognized_outputs_total", "Outputs recognised while scanning")?;
        registry.register(Box::new(local_height.clone()))?;
        registry.register(Box::new(remote_height.clone()))?;
        registry.register(Box::new(owned_outputs.clone()))?;
        registry.register(Box::new(balance.clone()))?;
        registry.register(Box::new(recognized.clone()))?;
        Ok(WalletMetrics { registry, local_height, remote_height, owned_outputs, balance, recognized })
    }

    pub fn render(&self) -> Result<Vec<u8>> {
        let mut buffer = vec![];
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

pub fn serve(cfg: crate::config::Metrics, metrics: WalletMetrics) -> Result<()> {
    let content_type: tiny_http::Header = "Content-Type: text/plain; version=0.0.4; charset=utf-8"
        .parse()
        .map_err(|_| anyhow::anyhow!("bad metrics content type header"))?;

    let bind_addr = cfg.bind.clone();
    thread::spawn(move || {
        let server = match tiny_http::Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("🔥 Could not start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        for request in server.incoming_requests() {
            let buffer = match metrics.render() {
                Ok(b) => b,
                Err(_) => {
                    eprintln!("🔥 Could not encode metrics");
                    continue;
                }
            };
            let response = tiny_http::Response::from_data(buffer).with_header(content_type.clone());
            let _ = request.respond(response);
        }
    });

    Ok(())
}
