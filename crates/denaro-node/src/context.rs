//! The node context: every long-lived component, created once at start and
//! passed explicitly. There are no ambient singletons.

use crate::config::NodeConfig;
use denaro_chain::{ChainEngine, ChainParams};
use denaro_ledger::Ledger;
use denaro_peers::{KeyedLimiter, NodeIdentity, PeerRegistry};
use denaro_storage::ChainStore;
use denaro_sync::SyncService;
use std::sync::Arc;
use std::time::Instant;

/// Per-endpoint-class token buckets, keyed by node id or client IP.
pub struct RateLimits {
    /// Public read endpoints: 60/minute.
    pub public_read: KeyedLimiter,
    /// Block submission: 20/minute.
    pub submit: KeyedLimiter,
    /// Signed peer traffic: 120/minute.
    pub peer: KeyedLimiter,
}

impl Default for RateLimits {
    fn default() -> Self {
        RateLimits {
            public_read: KeyedLimiter::per_minute(60, 60),
            submit: KeyedLimiter::per_minute(20, 20),
            peer: KeyedLimiter::per_minute(120, 120),
        }
    }
}

pub struct NodeContext {
    pub config: NodeConfig,
    pub store: Arc<dyn ChainStore>,
    pub chain: Arc<ChainEngine>,
    pub peers: Arc<PeerRegistry>,
    pub identity: Arc<NodeIdentity>,
    pub sync: Arc<SyncService>,
    pub limits: RateLimits,
    pub started_at: Instant,
}

impl NodeContext {
    pub fn build(
        config: NodeConfig,
        store: Arc<dyn ChainStore>,
        identity: NodeIdentity,
    ) -> Arc<NodeContext> {
        let identity = Arc::new(identity);
        let ledger = Ledger::new(store.clone());
        let chain = Arc::new(ChainEngine::new(
            store.clone(),
            ledger,
            ChainParams::default(),
        ));
        let peers = Arc::new(PeerRegistry::new(
            identity.node_id(),
            Some(config.peers_path()),
        ));
        let sync = Arc::new(SyncService::new(
            chain.clone(),
            peers.clone(),
            identity.clone(),
            config.self_url.clone(),
            config.bootstrap_url(),
            config.log.include_block_sync_messages,
        ));
        Arc::new(NodeContext {
            config,
            store,
            chain,
            peers,
            identity,
            sync,
            limits: RateLimits::default(),
            started_at: Instant::now(),
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Whether this node advertises a publicly reachable URL.
    pub fn is_public(&self) -> bool {
        self.config.self_url.is_some()
    }
}
