//! # Shared Types
//!
//! Core entities, the unified error taxonomy, the API response envelope and
//! a token-bucket rate limiter, shared by every crate in the workspace.

pub mod amount;
pub mod constants;
pub mod entities;
pub mod envelope;
pub mod errors;
pub mod rate_limiter;

pub use amount::Amount;
pub use entities::{
    hash_from_hex, hash_to_hex, BlockRecord, Difficulty, Hash, OutPoint, PeerRecord,
    PendingTxRecord, TxRecord, UtxoEntry,
};
pub use envelope::{ApiError, ApiResponse};
pub use errors::NodeError;
