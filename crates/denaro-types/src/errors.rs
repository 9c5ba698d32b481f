//! The node-wide error taxonomy.
//!
//! Every rejection a caller or peer can observe maps to one of these kinds;
//! each carries a stable wire code used in the response envelope.

use crate::entities::OutPoint;
use crate::Amount;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// Input failed to parse (non-hex, wrong length, bad framing).
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A signature failed cryptographic verification.
    #[error("invalid signature")]
    SignatureInvalid,

    /// An input references an output this node does not know.
    #[error("unknown input {0}")]
    UnknownInput(OutPoint),

    /// An input references an output that is already spent or reserved.
    #[error("double spend of {0}")]
    DoubleSpend(OutPoint),

    /// Outputs exceed inputs.
    #[error("insufficient funds: inputs {inputs}, outputs {outputs}")]
    InsufficientFunds { inputs: Amount, outputs: Amount },

    /// An amount is zero, negative or beyond the 63-bit range.
    #[error("amount out of range")]
    AmountOutOfRange,

    /// The payload violates a structural rule.
    #[error("invalid structure: {0}")]
    InvalidStructure(String),

    /// The block's parent is unknown.
    #[error("orphan block: unknown previous hash")]
    OrphanBlock,

    /// The declared difficulty deviates from the schedule.
    #[error("bad difficulty: expected {expected}, got {got}")]
    BadDifficulty { expected: String, got: String },

    /// The coinbase reward deviates from the schedule.
    #[error("bad reward: expected {expected}, got {got}")]
    BadReward { expected: Amount, got: Amount },

    /// The block hash does not satisfy the difficulty predicate.
    #[error("proof of work invalid")]
    PoWInvalid,

    /// The block exceeds a size limit.
    #[error("block too large: {size} > {limit}")]
    BlockTooLarge { size: usize, limit: usize },

    /// The block is at or below the current tip and adds no work.
    #[error("stale block")]
    Stale,

    /// The block was stored on a side branch without becoming the tip.
    #[error("side chain accepted")]
    SideChainAccepted,

    /// The mempool is at capacity and the transaction did not displace anything.
    #[error("mempool full")]
    MempoolFull,

    /// A sync cycle is already running.
    #[error("sync in progress")]
    SyncInProgress,

    /// The signed-request envelope failed verification.
    #[error("peer unauthenticated: {0}")]
    PeerUnauthenticated(String),

    /// The peer is currently banned.
    #[error("peer banned")]
    PeerBanned,

    /// The caller exhausted its rate budget.
    #[error("rate limited")]
    RateLimited,

    /// The storage backend is unreachable.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// An outbound call exceeded its deadline.
    #[error("timeout")]
    Timeout,

    /// Invariant violation; fatal to the current unit of work only.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NodeError {
    /// Stable wire code for the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            NodeError::MalformedInput(_) => "malformed_input",
            NodeError::SignatureInvalid => "signature_invalid",
            NodeError::UnknownInput(_) => "unknown_input",
            NodeError::DoubleSpend(_) => "double_spend",
            NodeError::InsufficientFunds { .. } => "insufficient_funds",
            NodeError::AmountOutOfRange => "amount_out_of_range",
            NodeError::InvalidStructure(_) => "invalid_structure",
            NodeError::OrphanBlock => "orphan_block",
            NodeError::BadDifficulty { .. } => "bad_difficulty",
            NodeError::BadReward { .. } => "bad_reward",
            NodeError::PoWInvalid => "pow_invalid",
            NodeError::BlockTooLarge { .. } => "block_too_large",
            NodeError::Stale => "stale",
            NodeError::SideChainAccepted => "side_chain_accepted",
            NodeError::MempoolFull => "mempool_full",
            NodeError::SyncInProgress => "sync_in_progress",
            NodeError::PeerUnauthenticated(_) => "peer_unauthenticated",
            NodeError::PeerBanned => "peer_banned",
            NodeError::RateLimited => "rate_limited",
            NodeError::StorageUnavailable(_) => "storage_unavailable",
            NodeError::Timeout => "timeout",
            NodeError::Internal(_) => "internal",
        }
    }

    /// Whether the error is a validation failure attributable to the sender.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            NodeError::MalformedInput(_)
                | NodeError::SignatureInvalid
                | NodeError::UnknownInput(_)
                | NodeError::DoubleSpend(_)
                | NodeError::InsufficientFunds { .. }
                | NodeError::AmountOutOfRange
                | NodeError::InvalidStructure(_)
                | NodeError::BadDifficulty { .. }
                | NodeError::BadReward { .. }
                | NodeError::PoWInvalid
                | NodeError::BlockTooLarge { .. }
        )
    }
}
