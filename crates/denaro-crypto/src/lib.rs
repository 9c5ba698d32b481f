//! # Crypto Primitives
//!
//! SHA-256 hashing, ECDSA over NIST P-256 with deterministic low-`s`
//! signatures, and the 45-character address codec.

pub mod address;
pub mod ecdsa;
pub mod errors;
pub mod hashing;

pub use address::{address_from_pubkey, is_valid_address, pubkey_from_address};
pub use ecdsa::{Keypair, PublicKey, Signature};
pub use errors::CryptoError;
pub use hashing::{sha256, sha256_hex, Sha256Stream};
