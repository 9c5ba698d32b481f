//! # Chain Storage
//!
//! The storage port (`ChainStore`) over the five relations (blocks,
//! transactions, unspent outputs, pending transactions, pending spent
//! outputs), plus two adapters: an in-memory store for tests and a Postgres
//! store implementing the authoritative schema. Writes go through an atomic
//! unit of work: a batch of operations that commits fully or not at all.

pub mod memory;
pub mod ports;
pub mod postgres;

pub use memory::MemoryStore;
pub use ports::{ChainStore, PendingOrder, ResolvedUtxo, StoreError, StoreOp};
pub use postgres::{PostgresConfig, PostgresStore};
