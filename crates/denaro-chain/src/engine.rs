//! Block submission, fork choice and reorganisation.

use crate::branch::{BranchBlock, BranchIndex};
use crate::work::chain_work;
use denaro_crypto::address_from_pubkey;
use denaro_ledger::Ledger;
use denaro_protocol::{
    adjustment_due, block_hash, block_reward, check_pow, merkle_root, retarget, BlockContent,
    ConsensusSchedule, Transaction,
};
use denaro_storage::ChainStore;
use denaro_types::constants::{
    BLOCKS_PER_ADJUSTMENT, GENESIS_PREVIOUS_HASH, MAX_BLOCKS_PER_SUBMISSION, MAX_BLOCK_SIZE_HEX,
    MAX_REORG_DEPTH, MAX_TX_DATA_SIZE, START_DIFFICULTY_TENTHS,
};
use denaro_types::{hash_to_hex, BlockRecord, Difficulty, Hash, NodeError, PendingTxRecord};
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// What happened to a submitted block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Extended the canonical tip.
    Applied,
    /// Replaced a canonical suffix of the given depth.
    Reorg { depth: u64 },
    /// Parked on a side branch with less work than the tip.
    SideChain,
    /// Already known, or at a height the chain has moved past.
    Stale,
}

/// One block in a bulk submission: raw content plus its transactions.
#[derive(Debug, Clone)]
pub struct BlockPayload {
    pub content_hex: String,
    pub transactions: Vec<Transaction>,
}

/// Result of a bulk submission: blocks committed before the first failure.
#[derive(Debug)]
pub struct BulkOutcome {
    pub accepted: usize,
    pub error: Option<NodeError>,
}

/// Everything a miner needs to search for the next block.
#[derive(Debug, Clone)]
pub struct MiningInfo {
    pub difficulty: Difficulty,
    pub last_block: Option<BlockRecord>,
    pub pending: Vec<Transaction>,
    pub pending_hashes: Vec<Hash>,
    pub merkle_root: Hash,
}

/// Consensus parameters. Production uses the defaults; tests shrink the
/// genesis difficulty so blocks can be mined inline.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub start_difficulty: Difficulty,
    pub max_reorg_depth: u64,
    pub schedule: ConsensusSchedule,
}

impl Default for ChainParams {
    fn default() -> Self {
        ChainParams {
            start_difficulty: Difficulty::from_tenths(START_DIFFICULTY_TENTHS),
            max_reorg_depth: MAX_REORG_DEPTH,
            schedule: ConsensusSchedule::mainnet(),
        }
    }
}

struct ParentInfo {
    id: u64,
    hash_hex: String,
    difficulty: Difficulty,
    timestamp: u64,
}

/// The chain engine. One instance per node; all block application is
/// serialised through `chain_lock`.
pub struct ChainEngine {
    store: Arc<dyn ChainStore>,
    ledger: Ledger,
    params: ChainParams,
    branches: SyncMutex<BranchIndex>,
    chain_lock: Mutex<()>,
}

impl ChainEngine {
    pub fn new(store: Arc<dyn ChainStore>, ledger: Ledger, params: ChainParams) -> ChainEngine {
        ChainEngine {
            store,
            ledger,
            params,
            branches: SyncMutex::new(BranchIndex::new(1024)),
            chain_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ChainStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Submit one decoded block through the full consensus pipeline.
    pub async fn submit_block(
        &self,
        content_hex: &str,
        transactions: Vec<Transaction>,
        now: u64,
    ) -> Result<BlockOutcome, NodeError> {
        if content_hex.len() > MAX_BLOCK_SIZE_HEX {
            return Err(NodeError::BlockTooLarge {
                size: content_hex.len(),
                limit: MAX_BLOCK_SIZE_HEX,
            });
        }
        let tx_data: usize = transactions.iter().map(Transaction::hex_size).sum();
        if tx_data > MAX_TX_DATA_SIZE {
            return Err(NodeError::BlockTooLarge {
                size: tx_data,
                limit: MAX_TX_DATA_SIZE,
            });
        }
        let content_bytes = hex::decode(content_hex)
            .map_err(|_| NodeError::MalformedInput("block content is not hex".into()))?;
        let content = BlockContent::decode(&content_bytes)?;
        let hash = block_hash(&content_bytes);

        let tx_hashes: Vec<Hash> = transactions.iter().map(Transaction::hash).collect();
        if merkle_root(&tx_hashes) != content.merkle_root {
            return Err(NodeError::InvalidStructure("merkle root mismatch".into()));
        }

        let _guard = self.chain_lock.lock().await;

        if self.store.get_block_by_hash(&hash).await?.is_some()
            || self.branches.lock().contains(&hash)
        {
            return Ok(BlockOutcome::Stale);
        }

        let tip = self.store.get_tip().await?;
        let parent = self.resolve_parent(&content).await?;
        let height = parent.as_ref().map(|p| p.id + 1).unwrap_or(1);
        self.validate_header(&content, &hash, parent.as_ref(), now)
            .await?;

        let record = BlockRecord {
            id: height,
            hash,
            content: content_hex.to_string(),
            miner_address: address_from_pubkey(&content.miner),
            nonce: u64::from(content.nonce),
            difficulty: content.difficulty,
            reward: block_reward(height),
            timestamp: u64::from(content.timestamp),
        };

        let extends_tip = match (&tip, &parent) {
            (None, None) => true,
            (Some(tip), Some(parent)) => hash_to_hex(&tip.hash) == parent.hash_hex,
            _ => false,
        };
        if extends_tip {
            self.ledger
                .apply_block(&record, &content.miner, &transactions, now)
                .await?;
            self.prune_branches(height).await;
            return Ok(BlockOutcome::Applied);
        }

        // Off-tip: park it and let the fork choice decide.
        let tip = tip.expect("off-tip block implies a tip exists");
        self.branches.lock().insert(BranchBlock {
            record: record.clone(),
            miner: content.miner,
            previous_hash: content.previous_hash,
            transactions,
        });
        self.evaluate_fork(&tip, &hash, now).await
    }

    /// Bulk submission: a contiguous run of blocks, committed prefix kept.
    pub async fn submit_blocks(&self, payloads: Vec<BlockPayload>, now: u64) -> BulkOutcome {
        if payloads.len() > MAX_BLOCKS_PER_SUBMISSION {
            return BulkOutcome {
                accepted: 0,
                error: Some(NodeError::InvalidStructure(format!(
                    "more than {MAX_BLOCKS_PER_SUBMISSION} blocks in one submission"
                ))),
            };
        }
        // Contiguity: each block must chain onto the previous payload.
        let mut previous: Option<Hash> = None;
        for payload in &payloads {
            let Ok(bytes) = hex::decode(&payload.content_hex) else {
                return BulkOutcome {
                    accepted: 0,
                    error: Some(NodeError::MalformedInput("block content is not hex".into())),
                };
            };
            if let Some(prev) = previous {
                match BlockContent::decode(&bytes) {
                    Ok(content) if content.previous_hash == prev => {}
                    Ok(_) => {
                        return BulkOutcome {
                            accepted: 0,
                            error: Some(NodeError::InvalidStructure(
                                "blocks do not form a contiguous chain".into(),
                            )),
                        }
                    }
                    Err(e) => {
                        return BulkOutcome {
                            accepted: 0,
                            error: Some(e),
                        }
                    }
                }
            }
            previous = Some(block_hash(&bytes));
        }

        let mut accepted = 0usize;
        for payload in payloads {
            match self
                .submit_block(&payload.content_hex, payload.transactions, now)
                .await
            {
                Ok(_) => accepted += 1,
                Err(e) => {
                    return BulkOutcome {
                        accepted,
                        error: Some(e),
                    }
                }
            }
        }
        BulkOutcome {
            accepted,
            error: None,
        }
    }

    /// Mempool admission. Holds the chain lock briefly so an admission can
    /// never interleave with a block application or reorg.
    pub async fn admit_transaction(
        &self,
        tx: &Transaction,
        now: u64,
    ) -> Result<(), NodeError> {
        let _guard = self.chain_lock.lock().await;
        self.ledger.admit_pending(tx, now).await
    }

    /// Mempool garbage collection, serialised with block application.
    pub async fn gc_mempool(&self) -> Result<usize, NodeError> {
        let _guard = self.chain_lock.lock().await;
        self.ledger.gc_pending().await
    }

    /// Difficulty the next block must declare.
    pub async fn next_difficulty(&self) -> Result<Difficulty, NodeError> {
        let tip = self.store.get_tip().await?;
        let parent = tip.map(|t| ParentInfo {
            id: t.id,
            hash_hex: hash_to_hex(&t.hash),
            difficulty: t.difficulty,
            timestamp: t.timestamp,
        });
        self.expected_difficulty(parent.as_ref()).await
    }

    /// Mining template: current difficulty, tip and a fee-ordered,
    /// dependency-complete transaction selection.
    pub async fn mining_info(&self) -> Result<MiningInfo, NodeError> {
        let difficulty = self.next_difficulty().await?;
        let last_block = self.store.get_tip().await?;
        let template = self.ledger.build_template().await?;
        Ok(MiningInfo {
            difficulty,
            last_block,
            merkle_root: template.merkle_root,
            pending_hashes: template.hashes,
            pending: template.transactions,
        })
    }

    /// Pending transactions referenced by hash in a submission are pulled
    /// from the pool; inline payloads are decoded by the caller.
    pub async fn hydrate_tx_refs(&self, hashes: &[Hash]) -> Result<Vec<Transaction>, NodeError> {
        let found: Vec<PendingTxRecord> = self.store.get_pending_by_hashes(hashes).await?;
        if found.len() < hashes.len() {
            return Err(NodeError::InvalidStructure(
                "transaction hash not found in pending pool".into(),
            ));
        }
        let mut by_hash = std::collections::HashMap::new();
        for record in found {
            by_hash.insert(record.tx_hash, Transaction::from_hex(&record.tx_hex)?);
        }
        hashes
            .iter()
            .map(|h| {
                by_hash
                    .remove(h)
                    .ok_or_else(|| NodeError::InvalidStructure("duplicate transaction ref".into()))
            })
            .collect()
    }

    async fn resolve_parent(&self, content: &BlockContent) -> Result<Option<ParentInfo>, NodeError> {
        let prev_hex = hash_to_hex(&content.previous_hash);
        if prev_hex == GENESIS_PREVIOUS_HASH {
            return Ok(None);
        }
        if let Some(parent) = self.store.get_block_by_hash(&content.previous_hash).await? {
            return Ok(Some(ParentInfo {
                id: parent.id,
                hash_hex: hash_to_hex(&parent.hash),
                difficulty: parent.difficulty,
                timestamp: parent.timestamp,
            }));
        }
        if let Some(parent) = self.branches.lock().get(&content.previous_hash) {
            return Ok(Some(ParentInfo {
                id: parent.record.id,
                hash_hex: hash_to_hex(&parent.record.hash),
                difficulty: parent.record.difficulty,
                timestamp: parent.record.timestamp,
            }));
        }
        Err(NodeError::OrphanBlock)
    }

    async fn expected_difficulty(
        &self,
        parent: Option<&ParentInfo>,
    ) -> Result<Difficulty, NodeError> {
        let Some(parent) = parent else {
            return Ok(self.params.start_difficulty);
        };
        if parent.id < BLOCKS_PER_ADJUSTMENT {
            return Ok(self.params.start_difficulty);
        }
        if !adjustment_due(parent.id) {
            return Ok(parent.difficulty);
        }
        // Window first block is at least 383 blocks below any fork point,
        // so the canonical chain always has it.
        let first = self
            .store
            .get_block_by_height(parent.id - (BLOCKS_PER_ADJUSTMENT - 1))
            .await?
            .ok_or_else(|| NodeError::Internal("adjustment window start missing".into()))?;
        let elapsed = parent.timestamp.saturating_sub(first.timestamp);
        Ok(retarget(parent.difficulty, elapsed))
    }

    async fn validate_header(
        &self,
        content: &BlockContent,
        hash: &Hash,
        parent: Option<&ParentInfo>,
        now: u64,
    ) -> Result<(), NodeError> {
        let height = parent.map(|p| p.id + 1).unwrap_or(1);
        let expected = self.expected_difficulty(parent).await?;
        if content.difficulty != expected {
            return Err(NodeError::BadDifficulty {
                expected: expected.to_string(),
                got: content.difficulty.to_string(),
            });
        }
        let prev_hex = parent
            .map(|p| p.hash_hex.clone())
            .unwrap_or_else(|| GENESIS_PREVIOUS_HASH.to_string());
        if !check_pow(&hash_to_hex(hash), &prev_hex, content.difficulty) {
            return Err(NodeError::PoWInvalid);
        }
        let rules = self.params.schedule.rules_for(height);
        if !rules.timestamp_ok(u64::from(content.timestamp), parent.map(|p| p.timestamp), now) {
            return Err(NodeError::InvalidStructure(
                "block timestamp out of bounds".into(),
            ));
        }
        Ok(())
    }

    /// Decide whether the branch ending at `leaf` now outweighs the
    /// canonical suffix, and reorganise if it does.
    async fn evaluate_fork(
        &self,
        tip: &BlockRecord,
        leaf: &Hash,
        now: u64,
    ) -> Result<BlockOutcome, NodeError> {
        let (branch, fork_parent) = self.branches.lock().chain_to_root(leaf);
        if branch.is_empty() {
            return Err(NodeError::Internal("branch leaf vanished".into()));
        }
        let fork_height = if hash_to_hex(&fork_parent) == GENESIS_PREVIOUS_HASH {
            0
        } else {
            self.store
                .get_block_by_hash(&fork_parent)
                .await?
                .ok_or(NodeError::OrphanBlock)?
                .id
        };
        let depth = tip.id.saturating_sub(fork_height);
        if depth > self.params.max_reorg_depth {
            warn!(depth, "fork beyond reorg window, keeping side branch");
            return Ok(BlockOutcome::SideChain);
        }

        let canonical = self
            .store
            .get_block_range(fork_height + 1, tip.id)
            .await?;
        let canonical_work = chain_work(canonical.iter().map(|b| b.difficulty));
        let branch_work = chain_work(branch.iter().map(|b| b.record.difficulty));
        if branch_work <= canonical_work {
            return Ok(BlockOutcome::SideChain);
        }

        self.reorg_to(branch, canonical, now).await?;
        Ok(BlockOutcome::Reorg { depth })
    }

    /// Undo the canonical suffix (newest first), then apply the branch
    /// (oldest first). Any failure rolls the whole thing back.
    async fn reorg_to(
        &self,
        branch: Vec<BranchBlock>,
        canonical: Vec<BlockRecord>,
        now: u64,
    ) -> Result<(), NodeError> {
        info!(
            from = canonical.first().map(|b| b.id).unwrap_or_default(),
            to = branch.last().map(|b| b.record.id).unwrap_or_default(),
            "reorganising"
        );
        // Undo LIFO, remembering everything needed to restore.
        let mut undone: Vec<(BlockRecord, Vec<Transaction>)> = Vec::new();
        for record in canonical.iter().rev() {
            let orphaned = self.ledger.undo_block(record).await?;
            undone.push((record.clone(), orphaned));
        }

        // Apply FIFO.
        let mut applied: Vec<BlockRecord> = Vec::new();
        let mut failure: Option<NodeError> = None;
        for block in &branch {
            match self
                .ledger
                .apply_block(&block.record, &block.miner, &block.transactions, now)
                .await
            {
                Ok(_) => applied.push(block.record.clone()),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(error) = failure {
            warn!(error = %error, "reorg failed, restoring original chain");
            for record in applied.iter().rev() {
                self.ledger.undo_block(record).await?;
            }
            for (record, txs) in undone.iter().rev() {
                let content = BlockContent::from_hex(&record.content)?;
                self.ledger
                    .apply_block(record, &content.miner, txs, now)
                    .await?;
            }
            return Err(error);
        }

        // Branch is canonical now: forget its branch entries, re-admit
        // orphaned transactions that still apply.
        {
            let mut branches = self.branches.lock();
            for block in &branch {
                branches.remove(&block.record.hash);
            }
        }
        let orphaned: Vec<Transaction> = undone.into_iter().flat_map(|(_, txs)| txs).collect();
        self.ledger.readmit(orphaned, now).await;
        if let Some(new_tip) = branch.last() {
            self.prune_branches(new_tip.record.id).await;
        }
        Ok(())
    }

    async fn prune_branches(&self, tip_height: u64) {
        let floor = tip_height.saturating_sub(self.params.max_reorg_depth);
        self.branches.lock().prune_below(floor);
    }

    /// Current canonical height; 0 when the chain is empty.
    pub async fn height(&self) -> Result<u64, NodeError> {
        Ok(self.store.get_tip().await?.map(|b| b.id).unwrap_or(0))
    }
}
