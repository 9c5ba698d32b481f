//! Background task loops: mempool garbage collection, stale-transaction
//! re-propagation and the health ticker. The discovery loop lives with the
//! sync service.

use crate::context::NodeContext;
use crate::http::helpers::unix_now;
use denaro_types::constants::MEMPOOL_GC_INTERVAL_SECS;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const HEALTH_INTERVAL_SECS: u64 = 300;

/// Periodically clear conflicting pending transactions and re-propagate
/// ones that have not been relayed recently.
pub async fn mempool_maintenance(ctx: Arc<NodeContext>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(MEMPOOL_GC_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so startup stays quiet.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match ctx.chain.gc_mempool().await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "mempool maintenance"),
                    Err(e) => warn!(error = %e, "mempool maintenance failed"),
                }
                repropagate_stale(&ctx).await;
            }
            _ = shutdown.changed() => {
                debug!("mempool maintenance stopping");
                return;
            }
        }
    }
}

async fn repropagate_stale(ctx: &Arc<NodeContext>) {
    let now = unix_now();
    let cutoff = now.saturating_sub(MEMPOOL_GC_INTERVAL_SECS);
    let stale = match ctx.store.pending_needing_propagation(cutoff).await {
        Ok(stale) => stale,
        Err(e) => {
            warn!(error = %e, "stale-pending scan failed");
            return;
        }
    };
    if stale.is_empty() {
        return;
    }
    debug!(count = stale.len(), "re-propagating stale pending transactions");
    let hashes: Vec<_> = stale.iter().map(|p| p.tx_hash).collect();
    for pending in stale {
        ctx.sync.propagate_tx(pending.tx_hex, None).await;
    }
    if let Err(e) = ctx.store.mark_pending_propagated(&hashes, now).await {
        warn!(error = %e, "propagation bookkeeping failed");
    }
}

/// Log a heartbeat with the node's vital signs.
pub async fn health_ticker(ctx: Arc<NodeContext>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(HEALTH_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let height = ctx.chain.height().await.unwrap_or(0);
                let pending = ctx.store.count_pending().await.unwrap_or(0);
                info!(
                    height,
                    pending,
                    peers = ctx.peers.len(),
                    uptime = ctx.uptime_seconds(),
                    syncing = ctx.sync.is_syncing(),
                    "node health"
                );
            }
            _ = shutdown.changed() => return,
        }
    }
}
