//! Canonical block content encoding.
//!
//! The block hash is SHA-256 over these bytes; mining varies `nonce` (and
//! optionally `timestamp`) until the proof-of-work predicate holds.
//!
//! ```text
//! version        u8   (2; absent in the 138-byte legacy layout)
//! previous_hash  32 bytes
//! miner pubkey   33 bytes compressed (legacy: 64-byte x ‖ y)
//! merkle_root    32 bytes
//! timestamp      u32 LE
//! difficulty     u16 LE (tenths)
//! nonce          u32 LE
//! ```

use denaro_crypto::{sha256, PublicKey};
use denaro_types::{Difficulty, Hash, NodeError};

pub const BLOCK_CONTENT_VERSION: u8 = 2;
const CONTENT_LEN: usize = 1 + 32 + 33 + 32 + 4 + 2 + 4;
const LEGACY_CONTENT_LEN: usize = 32 + 64 + 32 + 4 + 2 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContent {
    pub previous_hash: Hash,
    pub miner: PublicKey,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub difficulty: Difficulty,
    pub nonce: u32,
}

/// Hash the raw content bytes. Always computed over the bytes as received,
/// never over a re-encoding, so legacy blocks keep their hashes.
pub fn block_hash(content: &[u8]) -> Hash {
    sha256(content)
}

impl BlockContent {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CONTENT_LEN);
        out.push(BLOCK_CONTENT_VERSION);
        out.extend_from_slice(&self.previous_hash);
        out.extend_from_slice(self.miner.as_bytes());
        out.extend_from_slice(&self.merkle_root);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.difficulty.tenths().to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }

    pub fn decode(bytes: &[u8]) -> Result<BlockContent, NodeError> {
        match bytes.len() {
            CONTENT_LEN if bytes[0] == BLOCK_CONTENT_VERSION => Self::decode_fields(&bytes[1..], 33),
            LEGACY_CONTENT_LEN => Self::decode_fields(bytes, 64),
            _ => Err(NodeError::MalformedInput(
                "block content has unsupported length or version".into(),
            )),
        }
    }

    pub fn from_hex(s: &str) -> Result<BlockContent, NodeError> {
        let bytes =
            hex::decode(s).map_err(|_| NodeError::MalformedInput("content is not hex".into()))?;
        BlockContent::decode(&bytes)
    }

    fn decode_fields(bytes: &[u8], key_len: usize) -> Result<BlockContent, NodeError> {
        let previous_hash: Hash = bytes[..32].try_into().expect("32 bytes");
        let miner = decode_miner_key(&bytes[32..32 + key_len])?;
        let rest = &bytes[32 + key_len..];
        let merkle_root: Hash = rest[..32].try_into().expect("32 bytes");
        let timestamp = u32::from_le_bytes(rest[32..36].try_into().expect("4 bytes"));
        let difficulty =
            Difficulty::from_tenths(u16::from_le_bytes(rest[36..38].try_into().expect("2 bytes")));
        let nonce = u32::from_le_bytes(rest[38..42].try_into().expect("4 bytes"));
        Ok(BlockContent {
            previous_hash,
            miner,
            merkle_root,
            timestamp,
            difficulty,
            nonce,
        })
    }
}

fn decode_miner_key(bytes: &[u8]) -> Result<PublicKey, NodeError> {
    if bytes.len() == 33 {
        return PublicKey::from_slice(bytes).map_err(|e| NodeError::MalformedInput(e.to_string()));
    }
    // Legacy uncompressed x ‖ y: recover the tag from the y parity.
    let mut sec1 = [0u8; 33];
    sec1[0] = 0x02 | (bytes[63] & 1);
    sec1[1..].copy_from_slice(&bytes[..32]);
    PublicKey::from_bytes(sec1)
        .map_err(|_| NodeError::MalformedInput("legacy miner key is off-curve".into()))
}
