//! # Synchroniser
//!
//! Outbound peer communication: the signed HTTP client, handshake and
//! discovery, pull sync with a binary locator, push propagation, and the
//! process-wide single-flight guard.

pub mod client;
pub mod locator;
pub mod service;
pub mod singleflight;
pub mod wire;

pub use client::PeerClient;
pub use locator::locator_heights;
pub use service::{SyncOutcome, SyncService};
pub use singleflight::SingleFlight;
pub use wire::{BlockMsg, BlockSummary, HandshakeResult, StatusResult};
