//! UTXO transitions and mempool admission.

use denaro_crypto::{pubkey_from_address, PublicKey};
use denaro_protocol::{validate_transaction, ResolvedOutput, Transaction, UtxoView};
use denaro_storage::{ChainStore, PendingOrder, StoreOp};
use denaro_types::constants::MAX_MEMPOOL_SIZE;
use denaro_types::{
    Amount, BlockRecord, Hash, NodeError, OutPoint, PendingTxRecord, TxRecord, UtxoEntry,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of applying a block: the constructed coinbase and the fee total.
#[derive(Debug, Clone)]
pub struct AppliedBlock {
    pub coinbase: Transaction,
    pub total_fees: Amount,
}

/// A UTXO snapshot with an in-block overlay: outputs created by earlier
/// transactions become spendable, consumed outpoints disappear.
pub(crate) struct OverlayView {
    base: HashMap<OutPoint, ResolvedOutput>,
    spent: HashSet<OutPoint>,
}

impl OverlayView {
    pub(crate) fn new(base: HashMap<OutPoint, ResolvedOutput>) -> Self {
        OverlayView {
            base,
            spent: HashSet::new(),
        }
    }

    pub(crate) fn consume(&mut self, tx: &Transaction) {
        let tx_hash = tx.hash();
        for input in &tx.inputs {
            self.spent.insert(input.outpoint());
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            self.base.insert(
                OutPoint {
                    tx_hash,
                    index: index as u8,
                },
                ResolvedOutput {
                    owner: output.recipient,
                    amount: output.amount,
                },
            );
        }
    }
}

impl UtxoView for OverlayView {
    fn resolve(&self, outpoint: &OutPoint) -> Option<ResolvedOutput> {
        if self.spent.contains(outpoint) {
            return None;
        }
        self.base.get(outpoint).copied()
    }
}

/// The authoritative spent/unspent state machine over a [`ChainStore`].
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn ChainStore>,
    max_pool: usize,
}

impl Ledger {
    pub fn new(store: Arc<dyn ChainStore>) -> Ledger {
        Ledger {
            store,
            max_pool: MAX_MEMPOOL_SIZE,
        }
    }

    /// Override the mempool capacity (tests and constrained deployments).
    pub fn with_pool_limit(store: Arc<dyn ChainStore>, max_pool: usize) -> Ledger {
        Ledger { store, max_pool }
    }

    pub fn store(&self) -> &Arc<dyn ChainStore> {
        &self.store
    }

    /// Resolve the committed UTXO entries feeding `txs` into a validator
    /// snapshot. With `include_pending`, outputs of pending transactions are
    /// spendable too (mempool admission semantics).
    async fn snapshot_for(
        &self,
        txs: &[Transaction],
        include_pending: bool,
    ) -> Result<HashMap<OutPoint, ResolvedOutput>, NodeError> {
        let outpoints: Vec<OutPoint> = txs
            .iter()
            .flat_map(|tx| tx.spent_outpoints())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let mut snapshot = HashMap::with_capacity(outpoints.len());
        for resolved in self.store.get_unspent_outputs(&outpoints).await? {
            let owner = pubkey_from_address(&resolved.address)
                .map_err(|e| NodeError::Internal(format!("stored address invalid: {e}")))?;
            snapshot.insert(
                resolved.outpoint,
                ResolvedOutput {
                    owner,
                    amount: resolved.amount,
                },
            );
        }
        if include_pending {
            for outpoint in &outpoints {
                if snapshot.contains_key(outpoint) {
                    continue;
                }
                if let Some(parent) = self.store.get_pending(&outpoint.tx_hash).await? {
                    let parent_tx = Transaction::from_hex(&parent.tx_hex)?;
                    if let Some(output) = parent_tx.outputs.get(outpoint.index as usize) {
                        snapshot.insert(
                            *outpoint,
                            ResolvedOutput {
                                owner: output.recipient,
                                amount: output.amount,
                            },
                        );
                    }
                }
            }
        }
        Ok(snapshot)
    }

    /// Committed-UTXO snapshot for template assembly.
    pub(crate) async fn utxo_snapshot(
        &self,
        txs: &[Transaction],
    ) -> Result<HashMap<OutPoint, ResolvedOutput>, NodeError> {
        self.snapshot_for(txs, false).await
    }

    /// Admit a transaction to the mempool.
    pub async fn admit_pending(&self, tx: &Transaction, now: u64) -> Result<(), NodeError> {
        let tx_hash = tx.hash();
        if self.store.get_pending(&tx_hash).await?.is_some()
            || self.store.get_transaction(&tx_hash).await?.is_some()
        {
            return Err(NodeError::InvalidStructure(
                "transaction already known".into(),
            ));
        }

        let snapshot = self.snapshot_for(std::slice::from_ref(tx), true).await?;
        let fee = validate_transaction(tx, &snapshot)?;

        // Outputs reserved by other pending transactions are conflicts.
        let spent = tx.spent_outpoints();
        if let Some(reserved) = self.store.reserved_outpoints(&spent).await?.first() {
            return Err(NodeError::DoubleSpend(*reserved));
        }

        let mut ops = Vec::new();
        if self.store.count_pending().await? >= self.max_pool as u64 {
            ops.extend(self.eviction_ops(tx, fee).await?);
        }

        let inputs_addresses = tx
            .inputs
            .iter()
            .map(|input| {
                snapshot
                    .get(&input.outpoint())
                    .map(|r| denaro_crypto::address_from_pubkey(&r.owner))
                    .unwrap_or_default()
            })
            .collect();
        ops.push(StoreOp::UpsertPending(PendingTxRecord {
            tx_hash,
            tx_hex: tx.to_hex(),
            inputs_addresses,
            fees: fee,
            propagation_time: 0,
            time_received: now,
        }));
        ops.push(StoreOp::ReserveOutputs(spent));
        self.store.apply(ops).await?;
        Ok(())
    }

    /// On overflow, displace the cheapest entry if the newcomer pays more
    /// per byte; otherwise the pool is full.
    async fn eviction_ops(&self, tx: &Transaction, fee: Amount) -> Result<Vec<StoreOp>, NodeError> {
        let pool = self.store.list_pending(PendingOrder::FeeDesc).await?;
        let victim = pool.last().cloned().ok_or(NodeError::MempoolFull)?;
        let new_fee_per_byte = fee.units() / (tx.hex_size().max(1) as u64);
        if victim.fee_per_byte() >= new_fee_per_byte {
            return Err(NodeError::MempoolFull);
        }
        debug!(victim = %denaro_types::entities::hash_to_hex(&victim.tx_hash), "evicting cheapest pending transaction");
        let victim_tx = Transaction::from_hex(&victim.tx_hex)?;
        Ok(vec![
            StoreOp::DeletePending(victim.tx_hash),
            StoreOp::ReleaseOutputs(victim_tx.spent_outpoints()),
        ])
    }

    /// Apply a block as one unit of work. Transactions are re-validated
    /// sequentially so a later transaction may spend an earlier one's
    /// output; the coinbase is constructed from the schedule reward plus
    /// collected fees.
    pub async fn apply_block(
        &self,
        record: &BlockRecord,
        miner: &PublicKey,
        txs: &[Transaction],
        now: u64,
    ) -> Result<AppliedBlock, NodeError> {
        // Block-wide duplicate-input check.
        let mut seen = HashSet::new();
        for tx in txs {
            for outpoint in tx.spent_outpoints() {
                if !seen.insert(outpoint) {
                    return Err(NodeError::DoubleSpend(outpoint));
                }
            }
        }

        let mut view = OverlayView::new(self.snapshot_for(txs, false).await?);
        let mut fees = Vec::with_capacity(txs.len());
        let mut input_addresses: Vec<Vec<String>> = Vec::with_capacity(txs.len());
        for tx in txs {
            if tx.is_coinbase() {
                return Err(NodeError::InvalidStructure(
                    "coinbase supplied in transaction list".into(),
                ));
            }
            let addrs = tx
                .inputs
                .iter()
                .map(|input| {
                    view.resolve(&input.outpoint())
                        .map(|r| denaro_crypto::address_from_pubkey(&r.owner))
                        .unwrap_or_default()
                })
                .collect();
            let fee = validate_transaction(tx, &view)?;
            fees.push(fee);
            input_addresses.push(addrs);
            view.consume(tx);
        }
        let total_fees = Amount::checked_sum(fees.iter().copied()).ok_or(NodeError::AmountOutOfRange)?;
        let coinbase_value = record
            .reward
            .checked_add(total_fees)
            .ok_or(NodeError::AmountOutOfRange)?;
        let coinbase = Transaction::coinbase(*miner, coinbase_value, record.hash);

        let mut ops = vec![StoreOp::InsertBlock(record.clone())];
        let mut tx_records = vec![tx_record(&coinbase, record.hash, Amount::ZERO, vec![], now)];
        for ((tx, fee), addrs) in txs.iter().zip(&fees).zip(input_addresses) {
            tx_records.push(tx_record(tx, record.hash, *fee, addrs, now));
        }
        ops.push(StoreOp::InsertTransactions(tx_records));

        // Spend then create, transaction by transaction, coinbase last.
        let mut included = HashSet::new();
        for tx in txs {
            included.insert(tx.hash());
            for outpoint in tx.spent_outpoints() {
                ops.push(StoreOp::SpendOutput(outpoint));
            }
            push_output_ops(&mut ops, tx);
        }
        push_output_ops(&mut ops, &coinbase);

        // Drop every included or now-conflicting pending transaction,
        // releasing all of its reservations, not just the contested ones.
        let spent_in_block: HashSet<OutPoint> =
            txs.iter().flat_map(|tx| tx.spent_outpoints()).collect();
        for pending in self.store.list_pending(PendingOrder::OldestFirst).await? {
            let decoded = Transaction::from_hex(&pending.tx_hex).ok();
            let conflict = included.contains(&pending.tx_hash)
                || match &decoded {
                    Some(tx) => tx
                        .spent_outpoints()
                        .iter()
                        .any(|o| spent_in_block.contains(o)),
                    None => true,
                };
            if conflict {
                ops.push(StoreOp::DeletePending(pending.tx_hash));
                if let Some(tx) = decoded {
                    ops.push(StoreOp::ReleaseOutputs(tx.spent_outpoints()));
                }
            }
        }

        self.store.apply(ops).await?;
        info!(
            height = record.id,
            transactions = txs.len(),
            fees = %total_fees,
            "applied block"
        );
        Ok(AppliedBlock {
            coinbase,
            total_fees,
        })
    }

    /// Undo a block: delete the row (cascading its transactions and their
    /// outputs) and re-materialise the outputs it consumed. Returns the
    /// orphaned non-coinbase transactions.
    pub async fn undo_block(&self, block: &BlockRecord) -> Result<Vec<Transaction>, NodeError> {
        let records = self.store.get_block_transactions(&block.hash).await?;
        let undone_hashes: HashSet<Hash> = records.iter().map(|r| r.tx_hash).collect();
        let mut orphaned = Vec::new();
        let mut ops = vec![StoreOp::DeleteBlock(block.id)];
        for record in &records {
            let tx = Transaction::from_hex(&record.tx_hex)?;
            for input in &tx.inputs {
                let outpoint = input.outpoint();
                // An output produced inside the undone block vanishes with
                // it; only spends of older outputs are re-materialised.
                if undone_hashes.contains(&outpoint.tx_hash) {
                    continue;
                }
                let producer = self
                    .store
                    .get_transaction(&outpoint.tx_hash)
                    .await?
                    .ok_or_else(|| {
                        NodeError::Internal("consumed output has no producing transaction".into())
                    })?;
                let address = producer
                    .outputs_addresses
                    .get(outpoint.index as usize)
                    .cloned()
                    .ok_or_else(|| NodeError::Internal("output index out of range".into()))?;
                ops.push(StoreOp::CreateOutput(UtxoEntry {
                    tx_hash: outpoint.tx_hash,
                    index: outpoint.index,
                    address,
                }));
            }
            if !tx.is_coinbase() {
                orphaned.push(tx);
            }
        }
        self.store.apply(ops).await?;
        info!(height = block.id, orphaned = orphaned.len(), "undid block");
        Ok(orphaned)
    }

    /// Opportunistically re-admit transactions orphaned by a reorg.
    pub async fn readmit(&self, txs: Vec<Transaction>, now: u64) {
        for tx in txs {
            if let Err(e) = self.admit_pending(&tx, now).await {
                debug!(error = %e, "orphaned transaction not re-admitted");
            }
        }
    }

    /// Drop pending transactions that conflict with each other or are no
    /// longer spendable. First admitted wins. Runs passes until the pool is
    /// quiescent, so a dropped parent takes its dependents with it.
    pub async fn gc_pending(&self) -> Result<usize, NodeError> {
        let mut total = 0usize;
        for _ in 0..100 {
            let removed = self.gc_pass().await?;
            total += removed;
            if removed == 0 {
                break;
            }
        }
        Ok(total)
    }

    async fn gc_pass(&self) -> Result<usize, NodeError> {
        let pool = self.store.list_pending(PendingOrder::OldestFirst).await?;
        if pool.is_empty() {
            return Ok(0);
        }
        let mut decoded = Vec::with_capacity(pool.len());
        for pending in &pool {
            decoded.push(Transaction::from_hex(&pending.tx_hex).ok());
        }

        let all_txs: Vec<Transaction> = decoded.iter().flatten().cloned().collect();
        let snapshot = self.snapshot_for(&all_txs, true).await?;

        let mut used: HashSet<OutPoint> = HashSet::new();
        let mut ops = Vec::new();
        let mut removed = 0usize;
        for (pending, tx) in pool.iter().zip(decoded) {
            let drop_it = match &tx {
                None => true,
                Some(tx) => tx.spent_outpoints().iter().any(|o| {
                    used.contains(o) || !snapshot.contains_key(o)
                }),
            };
            if drop_it {
                ops.push(StoreOp::DeletePending(pending.tx_hash));
                if let Some(tx) = &tx {
                    ops.push(StoreOp::ReleaseOutputs(tx.spent_outpoints()));
                }
                removed += 1;
            } else if let Some(tx) = &tx {
                used.extend(tx.spent_outpoints());
            }
        }
        if removed > 0 {
            self.store.apply(ops).await?;
            info!(removed, "mempool garbage collection");
        }
        Ok(removed)
    }
}

fn push_output_ops(ops: &mut Vec<StoreOp>, tx: &Transaction) {
    let tx_hash = tx.hash();
    for (index, output) in tx.outputs.iter().enumerate() {
        ops.push(StoreOp::CreateOutput(UtxoEntry {
            tx_hash,
            index: index as u8,
            address: output.address(),
        }));
    }
}

fn tx_record(
    tx: &Transaction,
    block_hash: Hash,
    fee: Amount,
    inputs_addresses: Vec<String>,
    now: u64,
) -> TxRecord {
    TxRecord {
        block_hash,
        tx_hash: tx.hash(),
        tx_hex: tx.to_hex(),
        inputs_addresses,
        outputs_addresses: tx.outputs.iter().map(|o| o.address()).collect(),
        outputs_amounts: tx.outputs.iter().map(|o| o.amount).collect(),
        fees: fee,
        time_received: now,
    }
}
