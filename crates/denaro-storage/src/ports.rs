//! The storage port.

use async_trait::async_trait;
use denaro_types::{Amount, BlockRecord, Hash, NodeError, OutPoint, PendingTxRecord, TxRecord, UtxoEntry};
use thiserror::Error;

/// One mutation inside a unit of work.
#[derive(Debug, Clone)]
pub enum StoreOp {
    InsertBlock(BlockRecord),
    InsertTransactions(Vec<TxRecord>),
    /// Remove an output from the unspent set.
    SpendOutput(OutPoint),
    /// Add an output to the unspent set.
    CreateOutput(UtxoEntry),
    /// Remove the block at a height; cascades to its transactions and their
    /// unspent outputs.
    DeleteBlock(u64),
    UpsertPending(PendingTxRecord),
    DeletePending(Hash),
    /// Reserve outpoints for a pending transaction.
    ReserveOutputs(Vec<OutPoint>),
    /// Release reservations.
    ReleaseOutputs(Vec<OutPoint>),
    /// Drop the whole pending pool and its reservations.
    ClearPending,
}

/// Ordering for pending-pool listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOrder {
    /// Highest fee per hex character first; ties oldest first.
    FeeDesc,
    /// Oldest first.
    OldestFirst,
}

/// An unspent output joined with its amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUtxo {
    pub outpoint: OutPoint,
    pub address: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backend is unreachable; the caller may retry.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness or integrity constraint fired.
    #[error("storage conflict: {0}")]
    Conflict(String),

    /// A row could not be interpreted.
    #[error("storage corrupt: {0}")]
    Corrupt(String),

    #[error("storage internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for NodeError {
    fn from(err: StoreError) -> NodeError {
        match err {
            StoreError::Unavailable(msg) => NodeError::StorageUnavailable(msg),
            StoreError::Conflict(msg) => NodeError::Internal(format!("storage conflict: {msg}")),
            StoreError::Corrupt(msg) => NodeError::Internal(format!("storage corrupt: {msg}")),
            StoreError::Internal(msg) => NodeError::Internal(msg),
        }
    }
}

/// The storage adapter contract. Reads observe the latest committed unit of
/// work; `apply` commits a batch atomically.
#[async_trait]
pub trait ChainStore: Send + Sync {
    async fn apply(&self, ops: Vec<StoreOp>) -> Result<(), StoreError>;

    async fn get_tip(&self) -> Result<Option<BlockRecord>, StoreError>;
    async fn get_block_by_height(&self, height: u64) -> Result<Option<BlockRecord>, StoreError>;
    async fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<BlockRecord>, StoreError>;
    /// Blocks with `lo <= id <= hi`, ascending.
    async fn get_block_range(&self, lo: u64, hi: u64) -> Result<Vec<BlockRecord>, StoreError>;

    async fn get_block_transactions(&self, block_hash: &Hash) -> Result<Vec<TxRecord>, StoreError>;
    async fn get_transaction(&self, tx_hash: &Hash) -> Result<Option<TxRecord>, StoreError>;

    /// The subset of `outpoints` that is currently unspent, with amounts.
    async fn get_unspent_outputs(
        &self,
        outpoints: &[OutPoint],
    ) -> Result<Vec<ResolvedUtxo>, StoreError>;
    async fn get_unspent_for_address(
        &self,
        address: &str,
    ) -> Result<Vec<ResolvedUtxo>, StoreError>;

    /// Total minted supply: the sum of schedule rewards over all blocks.
    async fn get_supply(&self) -> Result<Amount, StoreError>;

    async fn list_pending(&self, order: PendingOrder) -> Result<Vec<PendingTxRecord>, StoreError>;
    async fn get_pending(&self, tx_hash: &Hash) -> Result<Option<PendingTxRecord>, StoreError>;
    async fn get_pending_by_hashes(
        &self,
        hashes: &[Hash],
    ) -> Result<Vec<PendingTxRecord>, StoreError>;
    async fn count_pending(&self) -> Result<u64, StoreError>;

    /// The subset of `outpoints` currently reserved by pending transactions.
    async fn reserved_outpoints(&self, outpoints: &[OutPoint]) -> Result<Vec<OutPoint>, StoreError>;

    /// Pending transactions never relayed, or last relayed before `cutoff`.
    async fn pending_needing_propagation(
        &self,
        cutoff: u64,
    ) -> Result<Vec<PendingTxRecord>, StoreError>;
    async fn mark_pending_propagated(&self, hashes: &[Hash], now: u64) -> Result<(), StoreError>;
}
