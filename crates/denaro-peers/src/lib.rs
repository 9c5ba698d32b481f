//! # Peers
//!
//! Cryptographic node identity, the signed-request envelope, the peer
//! registry with reputation scoring and doubling bans, and keyed
//! token-bucket rate limiting.

pub mod envelope;
pub mod identity;
pub mod limiter;
pub mod registry;

pub use envelope::{sign_request, verify_envelope, Envelope};
pub use identity::{IdentityError, NodeIdentity};
pub use limiter::KeyedLimiter;
pub use registry::{PeerEvent, PeerRegistry};
