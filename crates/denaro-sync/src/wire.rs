//! Wire DTOs shared by the HTTP surface and the outbound client.

use denaro_types::{hash_to_hex, BlockRecord};
use serde::{Deserialize, Serialize};

/// `GET /get_status` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub node_id: String,
    pub pubkey: String,
    pub url: Option<String>,
    pub is_public: bool,
    pub node_version: String,
    /// Canonical height; 0 when the chain is empty.
    pub height: u64,
    pub last_block_hash: Option<String>,
    pub uptime_seconds: u64,
}

/// `GET /handshake/challenge` result: the responder's identity and chain
/// state, plus a fresh nonce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResult {
    pub challenge: String,
    pub node_id: String,
    pub pubkey: String,
    pub url: Option<String>,
    pub is_public: bool,
    pub node_version: String,
    pub height: u64,
    pub last_block_hash: Option<String>,
}

/// A block on the wire: raw content plus its transactions as hex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMsg {
    pub id: u64,
    pub block_content: String,
    #[serde(default)]
    pub txs: Vec<String>,
}

impl BlockMsg {
    /// Approximate wire size, used to bound sync batches.
    pub fn wire_size(&self) -> usize {
        self.block_content.len() + self.txs.iter().map(String::len).sum::<usize>()
    }
}

/// A committed block as served to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSummary {
    pub id: u64,
    pub hash: String,
    pub content: String,
    pub address: String,
    pub nonce: u64,
    pub difficulty: String,
    pub reward: String,
    pub timestamp: u64,
}

impl BlockSummary {
    pub fn from_record(record: &BlockRecord) -> BlockSummary {
        BlockSummary {
            id: record.id,
            hash: hash_to_hex(&record.hash),
            content: record.content.clone(),
            address: record.miner_address.clone(),
            nonce: record.nonce,
            difficulty: record.difficulty.to_string(),
            reward: record.reward.to_string(),
            timestamp: record.timestamp,
        }
    }
}

/// `GET /get_block` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockResult {
    pub block: BlockSummary,
    pub transactions: Vec<String>,
}
