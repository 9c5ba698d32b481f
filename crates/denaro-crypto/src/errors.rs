//! Crypto error types.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Non-hex input, wrong length or bad framing.
    MalformedInput(String),
    /// Signature failed verification.
    SignatureInvalid,
    /// Bytes do not encode a valid curve point.
    InvalidPublicKey,
    /// Bytes do not encode a valid scalar.
    InvalidPrivateKey,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::MalformedInput(what) => write!(f, "malformed input: {what}"),
            CryptoError::SignatureInvalid => write!(f, "signature invalid"),
            CryptoError::InvalidPublicKey => write!(f, "invalid public key"),
            CryptoError::InvalidPrivateKey => write!(f, "invalid private key"),
        }
    }
}

impl std::error::Error for CryptoError {}
