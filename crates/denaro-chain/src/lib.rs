//! # Chain Engine
//!
//! Tip tracking, block submission, fork choice by cumulative work and
//! bounded reorganisation. All block application is serialised through one
//! chain lock; side branches live in a bounded in-memory index until they
//! either win the fork choice or fall out of the reorg window.

pub mod branch;
pub mod engine;
pub mod work;

pub use branch::BranchBlock;
pub use engine::{BlockOutcome, BlockPayload, BulkOutcome, ChainEngine, ChainParams, MiningInfo};
pub use work::chain_work;
