//! The peer registry.
//!
//! Tracks every known peer with reputation scoring, ban state and
//! last-seen bookkeeping. The registry is persisted to a JSON file and
//! reloaded on start; pruning is LRU by `last_seen` with a seven-day
//! inactivity threshold.

use denaro_types::constants::{MAX_PEERS, MAX_PEERS_COUNT, PEER_INACTIVITY_SECS};
use denaro_types::PeerRecord;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// First ban lasts an hour; each re-ban doubles it.
const BAN_BASE_SECS: u64 = 3_600;

/// Score at or below which a peer is banned.
const BAN_THRESHOLD: i32 = -100;

/// Reputation-relevant peer behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    /// Relayed a valid block or transaction.
    ValidPayload,
    /// Sent a payload that failed validation.
    InvalidPayload,
    /// Sent a signed envelope that failed verification.
    MalformedEnvelope,
    /// Broke the protocol outright.
    ProtocolViolation,
}

impl PeerEvent {
    pub fn delta(&self) -> i32 {
        match self {
            PeerEvent::ValidPayload => 1,
            PeerEvent::InvalidPayload => -5,
            PeerEvent::MalformedEnvelope => -20,
            PeerEvent::ProtocolViolation => -50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PeerEntry {
    record: PeerRecord,
    ban_count: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PeerFile {
    peers: Vec<PeerEntry>,
}

/// All known peers, keyed by node id.
pub struct PeerRegistry {
    self_id: String,
    path: Option<PathBuf>,
    peers: RwLock<HashMap<String, PeerEntry>>,
}

impl PeerRegistry {
    /// Create the registry, loading the persisted peer file when present.
    pub fn new(self_id: impl Into<String>, path: Option<PathBuf>) -> PeerRegistry {
        let registry = PeerRegistry {
            self_id: self_id.into(),
            path,
            peers: RwLock::new(HashMap::new()),
        };
        registry.load();
        registry
    }

    fn load(&self) {
        let Some(path) = &self.path else { return };
        if !path.exists() {
            return;
        }
        match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<PeerFile>(&s).map_err(|e| e.to_string()))
        {
            Ok(file) => {
                let mut peers = self.peers.write();
                for entry in file.peers {
                    peers.insert(entry.record.node_id.clone(), entry);
                }
                info!(count = peers.len(), "loaded peer file");
            }
            Err(e) => warn!(error = %e, "peer file unreadable, starting empty"),
        }
    }

    fn save(&self, peers: &HashMap<String, PeerEntry>) {
        let Some(path) = &self.path else { return };
        let file = PeerFile {
            peers: peers.values().cloned().collect(),
        };
        match serde_json::to_string_pretty(&file) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!(error = %e, "could not persist peer file");
                }
            }
            Err(e) => warn!(error = %e, "could not serialise peer file"),
        }
    }

    /// Insert or refresh a peer. Returns true when the peer is new.
    /// The registry never stores the node itself and prunes LRU when full.
    pub fn upsert(
        &self,
        node_id: &str,
        pubkey: &str,
        url: Option<String>,
        is_public: bool,
        node_version: &str,
        now: u64,
    ) -> bool {
        if node_id == self.self_id {
            return false;
        }
        let mut peers = self.peers.write();
        let is_new = !peers.contains_key(node_id);
        if is_new && peers.len() >= MAX_PEERS_COUNT {
            prune_lru(&mut peers, now);
            if peers.len() >= MAX_PEERS_COUNT {
                return false;
            }
        }
        let entry = peers
            .entry(node_id.to_string())
            .or_insert_with(|| PeerEntry {
                record: PeerRecord {
                    node_id: node_id.to_string(),
                    pubkey: pubkey.to_string(),
                    url: None,
                    is_public,
                    node_version: node_version.to_string(),
                    reputation_score: 0,
                    last_seen: now,
                    banned_until: None,
                },
                ban_count: 0,
            });
        entry.record.pubkey = pubkey.to_string();
        if url.is_some() {
            entry.record.url = url.map(|u| u.trim_end_matches('/').to_string());
        }
        entry.record.is_public = is_public;
        entry.record.node_version = node_version.to_string();
        entry.record.last_seen = now;
        self.save(&peers);
        is_new
    }

    /// Refresh `last_seen` for an active peer.
    pub fn touch(&self, node_id: &str, now: u64) {
        let mut peers = self.peers.write();
        if let Some(entry) = peers.get_mut(node_id) {
            entry.record.last_seen = now;
        }
    }

    /// Apply a reputation event; returns the new score. Crossing the ban
    /// threshold bans the peer for a doubling duration and resets the score.
    pub fn record_event(&self, node_id: &str, event: PeerEvent, now: u64) -> i32 {
        let mut peers = self.peers.write();
        let Some(entry) = peers.get_mut(node_id) else {
            return 0;
        };
        entry.record.reputation_score =
            (entry.record.reputation_score + event.delta()).min(100);
        let score = entry.record.reputation_score;
        if score <= BAN_THRESHOLD {
            let duration = BAN_BASE_SECS << entry.ban_count.min(16);
            entry.record.banned_until = Some(now + duration);
            entry.ban_count += 1;
            entry.record.reputation_score = 0;
            warn!(node_id, duration, "peer banned");
        }
        self.save(&peers);
        score
    }

    /// Whether the peer is currently banned. An expired ban is cleared.
    pub fn is_banned(&self, node_id: &str, now: u64) -> bool {
        let mut peers = self.peers.write();
        let Some(entry) = peers.get_mut(node_id) else {
            return false;
        };
        match entry.record.banned_until {
            Some(until) if until > now => true,
            Some(_) => {
                entry.record.banned_until = None;
                false
            }
            None => false,
        }
    }

    pub fn get(&self, node_id: &str) -> Option<PeerRecord> {
        self.peers.read().get(node_id).map(|e| e.record.clone())
    }

    /// Non-punitive removal of an unreachable peer.
    pub fn remove(&self, node_id: &str) -> bool {
        let mut peers = self.peers.write();
        let removed = peers.remove(node_id).is_some();
        if removed {
            self.save(&peers);
        }
        removed
    }

    pub fn all(&self) -> Vec<PeerRecord> {
        self.peers.read().values().map(|e| e.record.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Recently-seen peers, newest first, capped at the in-memory limit.
    pub fn active(&self, now: u64) -> Vec<PeerRecord> {
        let peers = self.peers.read();
        let mut active: Vec<PeerRecord> = peers
            .values()
            .filter(|e| e.record.last_seen + PEER_INACTIVITY_SECS > now)
            .map(|e| e.record.clone())
            .collect();
        active.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        active.truncate(MAX_PEERS);
        active
    }

    /// A random sample of connectable, unbanned, recently-seen peers.
    pub fn propagation_targets(&self, limit: usize, now: u64) -> Vec<PeerRecord> {
        let mut candidates: Vec<PeerRecord> = self
            .active(now)
            .into_iter()
            .filter(|p| p.url.is_some() && p.banned_until.map_or(true, |until| until <= now))
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(limit);
        candidates
    }
}

fn prune_lru(peers: &mut HashMap<String, PeerEntry>, now: u64) {
    // Inactive peers go first, then the least recently seen.
    peers.retain(|_, e| e.record.last_seen + PEER_INACTIVITY_SECS > now);
    while peers.len() >= MAX_PEERS_COUNT {
        let Some(oldest) = peers
            .values()
            .min_by_key(|e| e.record.last_seen)
            .map(|e| e.record.node_id.clone())
        else {
            return;
        };
        peers.remove(&oldest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PeerRegistry {
        PeerRegistry::new("self", None)
    }

    fn add(reg: &PeerRegistry, id: &str, now: u64) {
        reg.upsert(id, "02ab", Some(format!("http://{id}")), true, "2.0.0", now);
    }

    #[test]
    fn test_upsert_and_self_exclusion() {
        let reg = registry();
        assert!(reg.upsert("peer1", "02ab", None, false, "2.0.0", 10));
        assert!(!reg.upsert("peer1", "02ab", None, false, "2.0.0", 11));
        assert!(!reg.upsert("self", "02ab", None, false, "2.0.0", 12));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_reputation_deltas() {
        let reg = registry();
        add(&reg, "p", 10);
        assert_eq!(reg.record_event("p", PeerEvent::ValidPayload, 10), 1);
        assert_eq!(reg.record_event("p", PeerEvent::InvalidPayload, 10), -4);
        assert_eq!(reg.record_event("p", PeerEvent::MalformedEnvelope, 10), -24);
        assert_eq!(reg.record_event("p", PeerEvent::ProtocolViolation, 10), -74);
        assert!(!reg.is_banned("p", 10));
    }

    #[test]
    fn test_ban_at_threshold_and_doubling() {
        let reg = registry();
        add(&reg, "p", 0);
        for _ in 0..2 {
            reg.record_event("p", PeerEvent::ProtocolViolation, 0);
        }
        // Score -100: banned for the base hour.
        assert!(reg.is_banned("p", 0));
        assert!(reg.is_banned("p", 3_599));
        assert!(!reg.is_banned("p", 3_600));

        // Second offence bans twice as long.
        for _ in 0..2 {
            reg.record_event("p", PeerEvent::ProtocolViolation, 10_000);
        }
        assert!(reg.is_banned("p", 10_000 + 7_199));
        assert!(!reg.is_banned("p", 10_000 + 7_200));
    }

    #[test]
    fn test_score_capped_at_100() {
        let reg = registry();
        add(&reg, "p", 0);
        for _ in 0..200 {
            reg.record_event("p", PeerEvent::ValidPayload, 0);
        }
        assert_eq!(reg.get("p").unwrap().reputation_score, 100);
    }

    #[test]
    fn test_lru_prune_at_capacity() {
        let reg = registry();
        for i in 0..MAX_PEERS_COUNT {
            add(&reg, &format!("peer{i}"), 1_000_000 + i as u64);
        }
        assert_eq!(reg.len(), MAX_PEERS_COUNT);
        // peer0 is the least recently seen and gets displaced.
        add(&reg, "newcomer", 1_001_000);
        assert_eq!(reg.len(), MAX_PEERS_COUNT);
        assert!(reg.get("peer0").is_none());
        assert!(reg.get("newcomer").is_some());
    }

    #[test]
    fn test_active_excludes_stale_peers() {
        let reg = registry();
        add(&reg, "fresh", 1_000_000);
        add(&reg, "stale", 10);
        let now = 1_000_010;
        let active = reg.active(now);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].node_id, "fresh");
    }

    #[test]
    fn test_propagation_targets_need_urls() {
        let reg = registry();
        reg.upsert("no-url", "02ab", None, false, "2.0.0", 100);
        add(&reg, "with-url", 100);
        let targets = reg.propagation_targets(10, 101);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].node_id, "with-url");
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");
        {
            let reg = PeerRegistry::new("self", Some(path.clone()));
            add(&reg, "durable", 42);
            reg.record_event("durable", PeerEvent::ValidPayload, 42);
        }
        let reloaded = PeerRegistry::new("self", Some(path));
        let peer = reloaded.get("durable").unwrap();
        assert_eq!(peer.last_seen, 42);
        assert_eq!(peer.reputation_score, 1);
    }
}
