//! The process-wide sync guard.
//!
//! At most one sync cycle runs at a time; concurrent attempts observe
//! `SyncInProgress` instead of queueing.

use denaro_types::NodeError;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct SingleFlight {
    slot: Arc<Mutex<()>>,
}

/// Held for the duration of a sync cycle; dropping it releases the slot.
pub struct SyncPermit {
    _guard: OwnedMutexGuard<()>,
}

impl SingleFlight {
    pub fn new() -> SingleFlight {
        SingleFlight::default()
    }

    /// Claim the slot, or fail fast when a cycle is already running.
    pub fn try_begin(&self) -> Result<SyncPermit, NodeError> {
        match self.slot.clone().try_lock_owned() {
            Ok(guard) => Ok(SyncPermit { _guard: guard }),
            Err(_) => Err(NodeError::SyncInProgress),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}
