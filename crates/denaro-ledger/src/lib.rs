//! # Ledger
//!
//! The UTXO and mempool state machine. Applies and undoes blocks as single
//! units of work, admits pending transactions with conflict reservations,
//! garbage-collects the pool and assembles block templates.

pub mod ledger;
pub mod template;

pub use ledger::{AppliedBlock, Ledger};
pub use template::BlockTemplate;
