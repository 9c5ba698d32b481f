//! The sync service: pull sync, push propagation, periodic discovery and
//! mempool reconciliation.

use crate::client::PeerClient;
use crate::locator::locator_heights;
use crate::singleflight::SingleFlight;
use crate::wire::BlockMsg;
use denaro_chain::{BlockPayload, ChainEngine};
use denaro_peers::{NodeIdentity, PeerEvent, PeerRegistry};
use denaro_protocol::Transaction;
use denaro_storage::PendingOrder;
use denaro_types::constants::{
    CONNECTION_TIMEOUT_SECS, DISCOVERY_INTERVAL_SECS, MAX_BATCH_BYTES,
};
use denaro_types::{hash_to_hex, NodeError, PeerRecord};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Blocks requested per pull round-trip.
const PULL_BATCH_BLOCKS: u64 = 128;

/// Fan-out for push propagation.
const PROPAGATION_FANOUT: usize = 10;

/// Peers probed per discovery round.
const DISCOVERY_PROBES: usize = 2;

/// Unknown mempool entries fetched per round-trip.
const MEMPOOL_FETCH_BATCH: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No connectable peer to sync from.
    NoPeer,
    /// The remote chain was not ahead of ours.
    AlreadySynced,
    /// Blocks were pulled and submitted.
    Completed { accepted: usize },
}

pub struct SyncService {
    chain: Arc<ChainEngine>,
    peers: Arc<PeerRegistry>,
    identity: Arc<NodeIdentity>,
    http: reqwest::Client,
    flight: SingleFlight,
    self_url: Option<String>,
    bootstrap: Option<String>,
    /// Chatty per-batch logging, switched by LOG_INCLUDE_BLOCK_SYNC_MESSAGES.
    log_sync: bool,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl SyncService {
    pub fn new(
        chain: Arc<ChainEngine>,
        peers: Arc<PeerRegistry>,
        identity: Arc<NodeIdentity>,
        self_url: Option<String>,
        bootstrap: Option<String>,
        log_sync: bool,
    ) -> SyncService {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(CONNECTION_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        SyncService {
            chain,
            peers,
            identity,
            http,
            flight: SingleFlight::new(),
            self_url,
            bootstrap,
            log_sync,
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.flight.is_busy()
    }

    fn client_for(&self, url: &str) -> PeerClient {
        PeerClient::new(
            url,
            self.http.clone(),
            self.identity.clone(),
            self.self_url.clone(),
        )
    }

    /// Pull-sync against one peer (or the best-known one). Single-flight:
    /// concurrent calls observe `SyncInProgress`.
    pub async fn sync_with(&self, node_id: Option<String>) -> Result<SyncOutcome, NodeError> {
        let _permit = self.flight.try_begin()?;

        let peer = match node_id {
            Some(id) => self.peers.get(&id),
            None => self
                .peers
                .propagation_targets(1, unix_now())
                .into_iter()
                .next(),
        };
        let Some(peer) = peer else {
            return Ok(SyncOutcome::NoPeer);
        };
        let Some(url) = peer.url.clone() else {
            return Ok(SyncOutcome::NoPeer);
        };
        let client = self.client_for(&url);

        let status = match client.get_status().await {
            Ok(status) => status,
            Err(e) => {
                self.drop_unreachable(&peer, "status probe").await;
                return Err(e);
            }
        };
        let local_height = self.chain.height().await?;
        if status.height <= local_height {
            return Ok(SyncOutcome::AlreadySynced);
        }
        if self.log_sync {
            info!(
                peer = %short_id(&peer.node_id),
                remote = status.height,
                local = local_height,
                "pull sync starting"
            );
        }

        let ancestor = self.find_common_ancestor(&client, local_height).await?;
        let mut cursor = ancestor + 1;
        let mut accepted_total = 0usize;
        while cursor <= status.height {
            let batch = client.get_blocks(cursor, PULL_BATCH_BLOCKS).await?;
            if batch.is_empty() {
                break;
            }
            let fetched = batch.len() as u64;
            let mut payloads = Vec::with_capacity(batch.len());
            let mut batch_bytes = 0usize;
            for msg in batch {
                batch_bytes += msg.wire_size();
                if batch_bytes > MAX_BATCH_BYTES {
                    break;
                }
                let mut transactions = Vec::with_capacity(msg.txs.len());
                for tx_hex in &msg.txs {
                    transactions.push(Transaction::from_hex(tx_hex)?);
                }
                payloads.push(BlockPayload {
                    content_hex: msg.block_content,
                    transactions,
                });
            }
            let submitted = payloads.len() as u64;
            let outcome = self.chain.submit_blocks(payloads, unix_now()).await;
            accepted_total += outcome.accepted;
            if let Some(error) = outcome.error {
                warn!(peer = %short_id(&peer.node_id), error = %error, "sync batch failed");
                self.peers
                    .record_event(&peer.node_id, PeerEvent::InvalidPayload, unix_now());
                return Err(error);
            }
            self.peers.touch(&peer.node_id, unix_now());
            cursor += submitted.min(fetched).max(1);
        }
        if self.log_sync {
            info!(accepted = accepted_total, "pull sync finished");
        }
        Ok(SyncOutcome::Completed {
            accepted: accepted_total,
        })
    }

    /// Push-sync the other direction: ship our blocks to a peer whose chain
    /// is behind, in bounded batches. Used after a handshake reveals the
    /// peer is lagging and cannot reach us to pull.
    pub async fn push_sync_to(&self, node_id: &str, from_height: u64) -> Result<usize, NodeError> {
        let Some(peer) = self.peers.get(node_id) else {
            return Ok(0);
        };
        let Some(url) = peer.url.clone() else {
            return Ok(0);
        };
        let client = self.client_for(&url);
        let local_height = self.chain.height().await?;
        let mut cursor = from_height.max(1);
        let mut shipped = 0usize;
        while cursor <= local_height {
            let hi = (cursor + PULL_BATCH_BLOCKS - 1).min(local_height);
            let records = self.chain.store().get_block_range(cursor, hi).await?;
            if records.is_empty() {
                break;
            }
            let mut batch = Vec::with_capacity(records.len());
            let mut batch_bytes = 0usize;
            for record in records {
                let txs = self
                    .chain
                    .store()
                    .get_block_transactions(&record.hash)
                    .await?;
                let msg = BlockMsg {
                    id: record.id,
                    block_content: record.content,
                    txs: txs
                        .into_iter()
                        .filter(|t| !t.inputs_addresses.is_empty())
                        .map(|t| t.tx_hex)
                        .collect(),
                };
                batch_bytes += msg.wire_size();
                if !batch.is_empty() && batch_bytes > MAX_BATCH_BYTES {
                    break;
                }
                batch.push(msg);
            }
            let sent = batch.len() as u64;
            if let Err(e) = client.push_blocks(&batch).await {
                if self.log_sync {
                    info!(peer = %short_id(node_id), error = %e, "push sync halted");
                }
                return Err(e);
            }
            shipped += sent as usize;
            cursor += sent.max(1);
            self.peers.touch(node_id, unix_now());
        }
        if self.log_sync && shipped > 0 {
            info!(peer = %short_id(node_id), shipped, "push sync complete");
        }
        Ok(shipped)
    }

    /// Walk the locator from our tip until the peer agrees on a hash.
    async fn find_common_ancestor(
        &self,
        client: &PeerClient,
        local_height: u64,
    ) -> Result<u64, NodeError> {
        for height in locator_heights(local_height) {
            let Some(local) = self.chain.store().get_block_by_height(height).await? else {
                continue;
            };
            match client.get_block(height).await {
                Ok(remote) if remote.block.hash == hash_to_hex(&local.hash) => {
                    debug!(height, "common ancestor located");
                    return Ok(height);
                }
                Ok(_) => continue,
                // The peer may legitimately not have pruned-range answers;
                // treat a miss as divergence and keep walking back.
                Err(_) => continue,
            }
        }
        Ok(0)
    }

    /// Push a freshly accepted block to a random peer subset. Individual
    /// failures never abort the fan-out.
    pub async fn propagate_block(&self, msg: BlockMsg, skip: Option<String>) {
        let targets = self.propagation_peers(skip);
        let mut handles = Vec::with_capacity(targets.len());
        for peer in targets {
            let msg = msg.clone();
            let url = peer.url.clone().expect("propagation targets have urls");
            let client = self.client_for(&url);
            handles.push(tokio::spawn(async move {
                (peer, client.push_block(&msg).await)
            }));
        }
        for handle in handles {
            let Ok((peer, result)) = handle.await else {
                continue;
            };
            match result {
                Ok(_) => self.peers.touch(&peer.node_id, unix_now()),
                Err(e) => {
                    debug!(peer = %short_id(&peer.node_id), error = %e, "block propagation failed");
                    self.drop_unreachable(&peer, "block propagation").await;
                }
            }
        }
    }

    /// Relay a transaction to a random peer subset.
    pub async fn propagate_tx(&self, tx_hex: String, skip: Option<String>) {
        let targets = self.propagation_peers(skip);
        let mut handles = Vec::with_capacity(targets.len());
        for peer in targets {
            let tx_hex = tx_hex.clone();
            let url = peer.url.clone().expect("propagation targets have urls");
            let client = self.client_for(&url);
            handles.push(tokio::spawn(
                async move { (peer, client.push_tx(&tx_hex).await) },
            ));
        }
        for handle in handles {
            let Ok((peer, result)) = handle.await else {
                continue;
            };
            if let Err(e) = result {
                debug!(peer = %short_id(&peer.node_id), error = %e, "tx propagation failed");
                self.drop_unreachable(&peer, "tx propagation").await;
            }
        }
    }

    fn propagation_peers(&self, skip: Option<String>) -> Vec<PeerRecord> {
        self.peers
            .propagation_targets(PROPAGATION_FANOUT, unix_now())
            .into_iter()
            .filter(|p| Some(&p.node_id) != skip.as_ref())
            .collect()
    }

    /// One discovery round: handshake a couple of random peers, chase
    /// longer chains and reconcile the mempool.
    pub async fn discovery_tick(&self) {
        if self.peers.is_empty() {
            if let Some(bootstrap) = self.bootstrap.clone() {
                self.handshake_url(&bootstrap).await;
            }
        }
        let mut candidates = self.peers.propagation_targets(usize::MAX, unix_now());
        candidates.shuffle(&mut rand::thread_rng());
        for peer in candidates.into_iter().take(DISCOVERY_PROBES) {
            if let Some(url) = &peer.url {
                self.handshake_url(url).await;
            }
        }
        self.reconcile_mempool().await;
    }

    /// Client side of the handshake: learn the peer's identity and chain
    /// state, then pull if it is ahead.
    async fn handshake_url(&self, url: &str) {
        if Some(url) == self.self_url.as_deref() {
            return;
        }
        let client = self.client_for(url);
        let info = match client.handshake().await {
            Ok(info) => info,
            Err(e) => {
                debug!(url, error = %e, "handshake failed");
                return;
            }
        };
        let now = unix_now();
        let advertised = info.url.clone().or_else(|| Some(url.to_string()));
        let is_new = self.peers.upsert(
            &info.node_id,
            &info.pubkey,
            advertised,
            info.is_public,
            &info.node_version,
            now,
        );
        if is_new {
            info!(peer = %short_id(&info.node_id), "discovered peer");
        }
        let local_height = self.chain.height().await.unwrap_or(0);
        if info.height > local_height {
            info!(
                peer = %short_id(&info.node_id),
                remote = info.height,
                local = local_height,
                "peer is ahead, pulling"
            );
            if let Err(e) = self.sync_with(Some(info.node_id.clone())).await {
                debug!(error = %e, "handshake-triggered sync failed");
            }
        } else if info.height < local_height {
            // The lagging side may be unable to reach us; ship the missing
            // range instead of waiting for it to pull.
            if let Err(e) = self.push_sync_to(&info.node_id, info.height + 1).await {
                debug!(error = %e, "push sync failed");
            }
        }
    }

    /// Learn pending transactions this node has not seen from one random
    /// peer, admit them, and relay the newly learned ones onward.
    async fn reconcile_mempool(&self) {
        let Some(peer) = self
            .peers
            .propagation_targets(1, unix_now())
            .into_iter()
            .next()
        else {
            return;
        };
        let url = peer.url.clone().expect("propagation targets have urls");
        let client = self.client_for(&url);
        let remote = match client.get_mempool_hashes().await {
            Ok(hashes) => hashes,
            Err(e) => {
                debug!(error = %e, "mempool hashes unavailable");
                return;
            }
        };
        let local: std::collections::HashSet<String> = match self
            .chain
            .store()
            .list_pending(PendingOrder::OldestFirst)
            .await
        {
            Ok(pending) => pending.iter().map(|p| hash_to_hex(&p.tx_hash)).collect(),
            Err(e) => {
                debug!(error = %e, "local mempool unreadable");
                return;
            }
        };
        let needed: Vec<String> = remote.into_iter().filter(|h| !local.contains(h)).collect();
        if needed.is_empty() {
            return;
        }
        debug!(count = needed.len(), "fetching unknown pending transactions");
        for batch in needed.chunks(MEMPOOL_FETCH_BATCH) {
            let fetched = match client.get_transactions_by_hash(batch).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    debug!(error = %e, "pending fetch failed");
                    return;
                }
            };
            for tx_hex in fetched {
                let Ok(tx) = Transaction::from_hex(&tx_hex) else {
                    self.peers
                        .record_event(&peer.node_id, PeerEvent::InvalidPayload, unix_now());
                    continue;
                };
                match self.chain.admit_transaction(&tx, unix_now()).await {
                    Ok(()) => {
                        self.propagate_tx(tx_hex, Some(peer.node_id.clone())).await;
                    }
                    Err(e) => debug!(error = %e, "fetched transaction not admitted"),
                }
            }
        }
    }

    /// Unreachability is not a protocol violation: forget the peer without
    /// touching its reputation so it can be re-discovered later.
    async fn drop_unreachable(&self, peer: &PeerRecord, context: &str) {
        info!(peer = %short_id(&peer.node_id), context, "peer unreachable, removing");
        self.peers.remove(&peer.node_id);
    }

    /// The periodic discovery loop; exits on shutdown signal.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(DISCOVERY_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.discovery_tick().await,
                _ = shutdown.changed() => {
                    info!("discovery loop stopping");
                    return;
                }
            }
        }
    }
}

fn short_id(node_id: &str) -> &str {
    &node_id[..node_id.len().min(10)]
}
