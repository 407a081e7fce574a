use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::tracker::DonationTracker;
use crate::irc::roster::NetworkState;
use crate::ledger::store::LedgerStore;

/// Periodically drop gift intents whose confirmation window has passed.
pub fn spawn_sweeper<S: LedgerStore + 'static>(
    tracker: Arc<DonationTracker<S>>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    tracker.sweep().await;
                }
            }
        }
    })
}

/// Log a heartbeat line so hosting platforms and log readers can see the
/// process is alive.
pub fn spawn_liveness_ping<S: LedgerStore + 'static>(
    tracker: Arc<DonationTracker<S>>,
    network: Arc<NetworkState>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let pending_gifts = tracker.pending_count().await;
                    info!(
                        irc_connected = network.is_connected(),
                        channels = network.joined_channels().len(),
                        pending_gifts,
                        "bot alive"
                    );
                }
            }
        }
    })
}
