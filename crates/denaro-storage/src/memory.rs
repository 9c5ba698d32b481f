//! In-memory store for unit and scenario tests.
//!
//! A unit of work clones the state, applies every operation against the
//! clone and swaps it in on success, so a failing batch leaves nothing
//! behind. Production uses `PostgresStore` with real SQL transactions.

use crate::ports::{ChainStore, PendingOrder, ResolvedUtxo, StoreError, StoreOp};
use async_trait::async_trait;
use denaro_types::{
    hash_to_hex, Amount, BlockRecord, Hash, OutPoint, PendingTxRecord, TxRecord, UtxoEntry,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Default, Clone)]
struct MemState {
    blocks: BTreeMap<u64, BlockRecord>,
    heights_by_hash: HashMap<Hash, u64>,
    txs: HashMap<Hash, TxRecord>,
    txs_by_block: HashMap<Hash, Vec<Hash>>,
    utxos: HashMap<OutPoint, UtxoEntry>,
    pending: HashMap<Hash, PendingTxRecord>,
    pending_spent: HashSet<OutPoint>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(state: &MemState, outpoint: &OutPoint) -> Option<ResolvedUtxo> {
        let entry = state.utxos.get(outpoint)?;
        let tx = state.txs.get(&outpoint.tx_hash)?;
        let amount = *tx.outputs_amounts.get(outpoint.index as usize)?;
        Some(ResolvedUtxo {
            outpoint: *outpoint,
            address: entry.address.clone(),
            amount,
        })
    }
}

fn apply_op(state: &mut MemState, op: StoreOp) -> Result<(), StoreError> {
    match op {
        StoreOp::InsertBlock(block) => {
            if state.heights_by_hash.contains_key(&block.hash) {
                return Err(StoreError::Conflict(format!(
                    "duplicate block hash {}",
                    hash_to_hex(&block.hash)
                )));
            }
            if state.blocks.contains_key(&block.id) {
                return Err(StoreError::Conflict(format!(
                    "duplicate block height {}",
                    block.id
                )));
            }
            state.heights_by_hash.insert(block.hash, block.id);
            state.blocks.insert(block.id, block);
        }
        StoreOp::InsertTransactions(records) => {
            for record in records {
                if state.txs.contains_key(&record.tx_hash) {
                    return Err(StoreError::Conflict(format!(
                        "duplicate transaction {}",
                        hash_to_hex(&record.tx_hash)
                    )));
                }
                if !state.heights_by_hash.contains_key(&record.block_hash) {
                    return Err(StoreError::Conflict(
                        "transaction references unknown block".into(),
                    ));
                }
                state
                    .txs_by_block
                    .entry(record.block_hash)
                    .or_default()
                    .push(record.tx_hash);
                state.txs.insert(record.tx_hash, record);
            }
        }
        StoreOp::SpendOutput(outpoint) => {
            if state.utxos.remove(&outpoint).is_none() {
                return Err(StoreError::Conflict(format!(
                    "spending unknown output {outpoint}"
                )));
            }
        }
        StoreOp::CreateOutput(entry) => {
            if !state.txs.contains_key(&entry.tx_hash) {
                return Err(StoreError::Conflict(
                    "output references unknown transaction".into(),
                ));
            }
            state.utxos.insert(entry.outpoint(), entry);
        }
        StoreOp::DeleteBlock(height) => {
            let block = state
                .blocks
                .remove(&height)
                .ok_or_else(|| StoreError::Conflict(format!("no block at height {height}")))?;
            state.heights_by_hash.remove(&block.hash);
            for tx_hash in state.txs_by_block.remove(&block.hash).unwrap_or_default() {
                state.txs.remove(&tx_hash);
                state
                    .utxos
                    .retain(|outpoint, _| outpoint.tx_hash != tx_hash);
            }
        }
        StoreOp::UpsertPending(record) => {
            state.pending.insert(record.tx_hash, record);
        }
        StoreOp::DeletePending(tx_hash) => {
            state.pending.remove(&tx_hash);
        }
        StoreOp::ReserveOutputs(outpoints) => {
            state.pending_spent.extend(outpoints);
        }
        StoreOp::ReleaseOutputs(outpoints) => {
            for outpoint in outpoints {
                state.pending_spent.remove(&outpoint);
            }
        }
        StoreOp::ClearPending => {
            state.pending.clear();
            state.pending_spent.clear();
        }
    }
    Ok(())
}

#[async_trait]
impl ChainStore for MemoryStore {
    async fn apply(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let mut guard = self.state.write();
        let mut next = guard.clone();
        for op in ops {
            apply_op(&mut next, op)?;
        }
        *guard = next;
        Ok(())
    }

    async fn get_tip(&self) -> Result<Option<BlockRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .blocks
            .last_key_value()
            .map(|(_, b)| b.clone()))
    }

    async fn get_block_by_height(&self, height: u64) -> Result<Option<BlockRecord>, StoreError> {
        Ok(self.state.read().blocks.get(&height).cloned())
    }

    async fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<BlockRecord>, StoreError> {
        let state = self.state.read();
        Ok(state
            .heights_by_hash
            .get(hash)
            .and_then(|h| state.blocks.get(h))
            .cloned())
    }

    async fn get_block_range(&self, lo: u64, hi: u64) -> Result<Vec<BlockRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .blocks
            .range(lo..=hi)
            .map(|(_, b)| b.clone())
            .collect())
    }

    async fn get_block_transactions(&self, block_hash: &Hash) -> Result<Vec<TxRecord>, StoreError> {
        let state = self.state.read();
        Ok(state
            .txs_by_block
            .get(block_hash)
            .map(|hashes| {
                hashes
                    .iter()
                    .filter_map(|h| state.txs.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_transaction(&self, tx_hash: &Hash) -> Result<Option<TxRecord>, StoreError> {
        Ok(self.state.read().txs.get(tx_hash).cloned())
    }

    async fn get_unspent_outputs(
        &self,
        outpoints: &[OutPoint],
    ) -> Result<Vec<ResolvedUtxo>, StoreError> {
        let state = self.state.read();
        Ok(outpoints
            .iter()
            .filter_map(|op| Self::resolve(&state, op))
            .collect())
    }

    async fn get_unspent_for_address(
        &self,
        address: &str,
    ) -> Result<Vec<ResolvedUtxo>, StoreError> {
        let state = self.state.read();
        let mut result: Vec<ResolvedUtxo> = state
            .utxos
            .iter()
            .filter(|(_, entry)| entry.address == address)
            .filter_map(|(outpoint, _)| Self::resolve(&state, outpoint))
            .collect();
        result.sort_by_key(|r| (r.outpoint.tx_hash, r.outpoint.index));
        Ok(result)
    }

    async fn get_supply(&self) -> Result<Amount, StoreError> {
        Ok(self.state.read().blocks.values().map(|b| b.reward).sum())
    }

    async fn list_pending(&self, order: PendingOrder) -> Result<Vec<PendingTxRecord>, StoreError> {
        let mut pending: Vec<PendingTxRecord> =
            self.state.read().pending.values().cloned().collect();
        match order {
            PendingOrder::FeeDesc => pending.sort_by(|a, b| {
                b.fee_per_byte()
                    .cmp(&a.fee_per_byte())
                    .then(a.time_received.cmp(&b.time_received))
            }),
            PendingOrder::OldestFirst => pending.sort_by_key(|p| p.time_received),
        }
        Ok(pending)
    }

    async fn get_pending(&self, tx_hash: &Hash) -> Result<Option<PendingTxRecord>, StoreError> {
        Ok(self.state.read().pending.get(tx_hash).cloned())
    }

    async fn get_pending_by_hashes(
        &self,
        hashes: &[Hash],
    ) -> Result<Vec<PendingTxRecord>, StoreError> {
        let state = self.state.read();
        Ok(hashes
            .iter()
            .filter_map(|h| state.pending.get(h).cloned())
            .collect())
    }

    async fn count_pending(&self) -> Result<u64, StoreError> {
        Ok(self.state.read().pending.len() as u64)
    }

    async fn reserved_outpoints(&self, outpoints: &[OutPoint]) -> Result<Vec<OutPoint>, StoreError> {
        let state = self.state.read();
        Ok(outpoints
            .iter()
            .filter(|op| state.pending_spent.contains(op))
            .copied()
            .collect())
    }

    async fn pending_needing_propagation(
        &self,
        cutoff: u64,
    ) -> Result<Vec<PendingTxRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .pending
            .values()
            .filter(|p| p.propagation_time < cutoff)
            .cloned()
            .collect())
    }

    async fn mark_pending_propagated(&self, hashes: &[Hash], now: u64) -> Result<(), StoreError> {
        let mut state = self.state.write();
        for hash in hashes {
            if let Some(pending) = state.pending.get_mut(hash) {
                pending.propagation_time = now;
            }
        }
        Ok(())
    }
}
