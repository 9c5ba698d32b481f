//! Block-template assembly.
//!
//! Selects a fee-per-byte-ordered prefix of the mempool whose aggregate hex
//! size fits the per-block transaction budget, resolving in-pool parent →
//! child dependencies so every included transaction spends either the
//! committed UTXO set or an earlier selected transaction.

use crate::ledger::Ledger;
use denaro_protocol::{merkle_root, Transaction};
use denaro_storage::PendingOrder;
use denaro_types::constants::MAX_TX_DATA_SIZE;
use denaro_types::{Hash, NodeError, OutPoint};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// A mining template: ordered transactions and their merkle root.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub transactions: Vec<Transaction>,
    pub hashes: Vec<Hash>,
    pub merkle_root: Hash,
    pub total_hex_size: usize,
}

impl Ledger {
    pub async fn build_template(&self) -> Result<BlockTemplate, NodeError> {
        // Pool order is the selection priority: fee per byte, ties oldest.
        let pool = self.store().list_pending(PendingOrder::FeeDesc).await?;
        let mut txs: Vec<Option<Transaction>> = Vec::with_capacity(pool.len());
        let mut seq_by_hash: HashMap<Hash, usize> = HashMap::new();
        for (seq, pending) in pool.iter().enumerate() {
            let decoded = Transaction::from_hex(&pending.tx_hex).ok();
            if decoded.is_some() {
                seq_by_hash.insert(pending.tx_hash, seq);
            }
            txs.push(decoded);
        }

        let decoded_txs: Vec<Transaction> = txs.iter().flatten().cloned().collect();
        let utxo = self.utxo_snapshot(&decoded_txs).await?;

        // Dependency graph over the pool; anything with an input that is
        // neither committed nor pending is unselectable.
        let mut indegree: HashMap<usize, usize> = HashMap::new();
        let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut unselectable: HashSet<usize> = HashSet::new();
        for (seq, tx) in txs.iter().enumerate() {
            let Some(tx) = tx else {
                unselectable.insert(seq);
                continue;
            };
            let mut degree = 0usize;
            for input in &tx.inputs {
                let outpoint = input.outpoint();
                if let Some(&parent) = seq_by_hash.get(&outpoint.tx_hash) {
                    children.entry(parent).or_default().push(seq);
                    degree += 1;
                } else if !utxo.contains_key(&outpoint) {
                    unselectable.insert(seq);
                }
            }
            indegree.insert(seq, degree);
        }

        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .filter(|(seq, degree)| **degree == 0 && !unselectable.contains(seq))
            .map(|(seq, _)| Reverse(*seq))
            .collect();

        let mut selected = Vec::new();
        let mut hashes = Vec::new();
        let mut spent: HashSet<OutPoint> = HashSet::new();
        let mut total_hex_size = 0usize;
        while let Some(Reverse(seq)) = ready.pop() {
            let tx = txs[seq].as_ref().expect("ready entries are decoded");
            let size = tx.hex_size();
            if total_hex_size + size > MAX_TX_DATA_SIZE {
                break;
            }
            if tx.spent_outpoints().iter().any(|o| spent.contains(o)) {
                continue;
            }
            spent.extend(tx.spent_outpoints());
            total_hex_size += size;
            hashes.push(tx.hash());
            selected.push(tx.clone());
            for &child in children.get(&seq).into_iter().flatten() {
                if unselectable.contains(&child) {
                    continue;
                }
                let degree = indegree.get_mut(&child).expect("child has indegree");
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(child));
                }
            }
        }

        Ok(BlockTemplate {
            merkle_root: merkle_root(&hashes),
            transactions: selected,
            hashes,
            total_hex_size,
        })
    }
}
