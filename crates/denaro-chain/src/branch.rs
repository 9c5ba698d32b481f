//! The side-branch index.
//!
//! Competing leaves are held fully decoded in memory until they win the
//! fork choice or fall below the reorg window. The index is a cache: a
//! restart forgets side branches and they are re-learned from peers.

use denaro_crypto::PublicKey;
use denaro_protocol::Transaction;
use denaro_types::{BlockRecord, Hash};
use std::collections::HashMap;

/// A validated block parked off the canonical chain.
#[derive(Debug, Clone)]
pub struct BranchBlock {
    pub record: BlockRecord,
    pub miner: PublicKey,
    pub previous_hash: Hash,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug)]
pub struct BranchIndex {
    blocks: HashMap<Hash, BranchBlock>,
    capacity: usize,
}

impl BranchIndex {
    pub fn new(capacity: usize) -> BranchIndex {
        BranchIndex {
            blocks: HashMap::new(),
            capacity,
        }
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&BranchBlock> {
        self.blocks.get(hash)
    }

    pub fn insert(&mut self, block: BranchBlock) {
        self.blocks.insert(block.record.hash, block);
        if self.blocks.len() > self.capacity {
            // Shed the lowest block; it is the least likely to seed a reorg.
            if let Some(hash) = self
                .blocks
                .values()
                .min_by_key(|b| b.record.id)
                .map(|b| b.record.hash)
            {
                self.blocks.remove(&hash);
            }
        }
    }

    pub fn remove(&mut self, hash: &Hash) -> Option<BranchBlock> {
        self.blocks.remove(hash)
    }

    /// Walk parent links from `leaf` while they stay inside the index.
    /// Returns the chain oldest-first and the hash below the oldest entry.
    pub fn chain_to_root(&self, leaf: &Hash) -> (Vec<BranchBlock>, Hash) {
        let mut chain = Vec::new();
        let mut cursor = *leaf;
        while let Some(block) = self.blocks.get(&cursor) {
            cursor = block.previous_hash;
            chain.push(block.clone());
        }
        chain.reverse();
        (chain, cursor)
    }

    /// Drop branch entries at or below `floor` height.
    pub fn prune_below(&mut self, floor: u64) {
        self.blocks.retain(|_, b| b.record.id > floor);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
