use crate::{metrics::WalletMetrics, node::NodeClient, transaction::NATIVE_TOKEN, wallet::Wallet};
use std::sync::Arc;
use tokio::{sync::{broadcast::Receiver, Mutex}, task::{self, JoinHandle}, time::{interval, Duration, MissedTickBehavior}};
use tracing::{debug, error, info, warn};

fn record<N: NodeClient>(metrics: &WalletMetrics, wallet: &Wallet<N>) {
    metrics.local_height.set(wallet.local_height() as i64);
    metrics.owned_outputs.set(wallet.state().transfers.len() as i64);
    let units = wallet.state().total_balance(&NATIVE_TOKEN);
    metrics.balance.set(i64::try_from(units).unwrap_or(i64::MAX));
}

/// Runs the refresh loop for one account until shutdown or a fatal error.
/// Transient node errors are logged and retried on the next tick.
pub fn spawn<N: NodeClient + 'static>(
    wallet: Arc<Mutex<Wallet<N>>>,
    metrics: WalletMetrics,
    period: Duration,
    mut shutdown_rx: Receiver<()>,
) -> JoinHandle<()> {
    task::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("🛑 Refresh task received shutdown signal");
                    break;
                }

                _ = ticker.tick() => {
                    let mut w = wallet.lock().await;
                    match w.refresh_once().await {
                        Ok(report) => {
                            metrics.remote_height.set(report.remote_height as i64);
                            metrics.recognized.inc_by(report.found);
                            record(&metrics, &w);
                            if report.blocks > 0 {
                                debug!(
                                    blocks = report.blocks,
                                    found = report.found,
                                    spent = report.spent,
                                    height = w.local_height(),
                                    "refresh pass done"
                                );
                            }
                        }
                        Err(e) if e.is_fatal() => {
                            error!(code = e.code(), "refresh stopped: {e}");
                            break;
                        }
                        Err(e) => warn!(code = e.code(), "refresh failed, retrying: {e}"),
                    }
                }
            }
        }
    })
}
