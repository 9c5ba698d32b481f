//! Core chain entities.
//!
//! These mirror the storage schema row for row; richer decoded forms live in
//! the protocol crate.

use crate::amount::Amount;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte SHA-256 digest.
pub type Hash = [u8; 32];

/// Lowercase hex rendering of a hash.
pub fn hash_to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Parse a 64-char lowercase hex hash.
pub fn hash_from_hex(s: &str) -> Option<Hash> {
    if s.len() != 64 {
        return None;
    }
    let bytes = hex::decode(s).ok()?;
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Some(hash)
}

/// A reference to a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: Hash,
    pub index: u8,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hash_to_hex(&self.tx_hash), self.index)
    }
}

/// Block difficulty in tenths, so consensus equality never touches floats.
///
/// `Difficulty(60)` renders as `6.0`; the storage column is NUMERIC(3,1).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Difficulty(u16);

impl Difficulty {
    pub fn from_tenths(tenths: u16) -> Difficulty {
        Difficulty(tenths)
    }

    pub fn tenths(&self) -> u16 {
        self.0
    }

    /// Whole hex-prefix length demanded by the proof-of-work predicate.
    pub fn integer_part(&self) -> usize {
        (self.0 / 10) as usize
    }

    /// Fractional tenths (0..=9).
    pub fn fraction_tenths(&self) -> u16 {
        self.0 % 10
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.0) / 10.0
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0 / 10, self.0 % 10)
    }
}

/// A committed block row. `id` is the 1-based height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: u64,
    pub hash: Hash,
    /// Hex of the canonical content bytes the hash commits to.
    pub content: String,
    pub miner_address: String,
    pub nonce: u64,
    pub difficulty: Difficulty,
    /// Schedule reward for this height (fees are not included here).
    pub reward: Amount,
    pub timestamp: u64,
}

/// A committed transaction row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub block_hash: Hash,
    pub tx_hash: Hash,
    pub tx_hex: String,
    pub inputs_addresses: Vec<String>,
    pub outputs_addresses: Vec<String>,
    pub outputs_amounts: Vec<Amount>,
    pub fees: Amount,
    pub time_received: u64,
}

/// An unspent-output row. The amount lives on the producing transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub tx_hash: Hash,
    pub index: u8,
    pub address: String,
}

impl UtxoEntry {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            tx_hash: self.tx_hash,
            index: self.index,
        }
    }
}

/// A mempool row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTxRecord {
    pub tx_hash: Hash,
    pub tx_hex: String,
    pub inputs_addresses: Vec<String>,
    pub fees: Amount,
    /// When the transaction was last relayed to peers; 0 = never.
    pub propagation_time: u64,
    pub time_received: u64,
}

impl PendingTxRecord {
    /// Fee per hex character, the mempool ordering key.
    pub fn fee_per_byte(&self) -> u64 {
        let size = self.tx_hex.len().max(1) as u64;
        self.fees.units() / size
    }
}

/// A known peer. Identity is stable across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub node_id: String,
    pub pubkey: String,
    pub url: Option<String>,
    pub is_public: bool,
    pub node_version: String,
    pub reputation_score: i32,
    pub last_seen: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banned_until: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hex_roundtrip() {
        let hash = [0xabu8; 32];
        let hex = hash_to_hex(&hash);
        assert_eq!(hex.len(), 64);
        assert_eq!(hash_from_hex(&hex), Some(hash));
        assert_eq!(hash_from_hex("ab"), None);
    }

    #[test]
    fn test_difficulty_parts() {
        let d = Difficulty::from_tenths(63);
        assert_eq!(d.integer_part(), 6);
        assert_eq!(d.fraction_tenths(), 3);
        assert_eq!(d.to_string(), "6.3");
        assert_eq!(Difficulty::from_tenths(60).to_string(), "6.0");
    }

    #[test]
    fn test_fee_per_byte() {
        let pending = PendingTxRecord {
            tx_hash: [0u8; 32],
            tx_hex: "aa".repeat(50),
            inputs_addresses: vec![],
            fees: Amount::from_units(1_000).unwrap(),
            propagation_time: 0,
            time_received: 0,
        };
        assert_eq!(pending.fee_per_byte(), 10);
    }
}
