//! ECDSA over NIST P-256.
//!
//! Signing uses RFC 6979 deterministic nonces and normalizes `s` to the low
//! half of the scalar range; verification normalizes before checking so both
//! encodings of a signature are accepted.

use crate::errors::CryptoError;
use crate::hashing::sha256;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature as P256Signature, SigningKey, VerifyingKey};
use zeroize::Zeroize;

/// A compressed P-256 public key (33 bytes, tag 0x02 or 0x03).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 33]);

impl PublicKey {
    /// Validate and wrap compressed SEC1 bytes.
    pub fn from_bytes(bytes: [u8; 33]) -> Result<Self, CryptoError> {
        VerifyingKey::from_sec1_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(PublicKey(bytes))
    }

    /// Parse from a slice, checking length first.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 33] = bytes
            .try_into()
            .map_err(|_| CryptoError::MalformedInput("public key must be 33 bytes".into()))?;
        Self::from_bytes(arr)
    }

    /// Parse from lowercase hex.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s)
            .map_err(|_| CryptoError::MalformedInput("public key is not hex".into()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify a signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        let key =
            VerifyingKey::from_sec1_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig =
            P256Signature::from_slice(&signature.0).map_err(|_| CryptoError::SignatureInvalid)?;
        let sig = sig.normalize_s().unwrap_or(sig);
        key.verify(message, &sig)
            .map_err(|_| CryptoError::SignatureInvalid)
    }

    /// The node identity digest: SHA-256 over the compressed bytes.
    pub fn identity_digest(&self) -> [u8; 32] {
        sha256(&self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// A 64-byte `r ‖ s` signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| CryptoError::MalformedInput("signature must be 64 bytes".into()))?;
        Ok(Signature(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s)
            .map_err(|_| CryptoError::MalformedInput("signature is not hex".into()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

/// A P-256 keypair.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        Keypair {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Restore from 32 secret scalar bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Keypair { signing_key })
    }

    /// Secret scalar bytes, for persistence.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    pub fn public_key(&self) -> PublicKey {
        let point = self.signing_key.verifying_key().to_encoded_point(true);
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(point.as_bytes());
        PublicKey(bytes)
    }

    /// Deterministic low-`s` signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig: P256Signature = self.signing_key.sign(message);
        let sig = sig.normalize_s().unwrap_or(sig);
        let bytes: [u8; 64] = sig.to_bytes().into();
        Signature(bytes)
    }
}

impl Drop for Keypair {
    fn drop(&mut self) {
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        bytes.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let keypair = Keypair::generate();
        let sig = keypair.sign(b"denaro");
        assert!(keypair.public_key().verify(b"denaro", &sig).is_ok());
    }

    #[test]
    fn test_wrong_message_fails() {
        let keypair = Keypair::generate();
        let sig = keypair.sign(b"one");
        assert_eq!(
            keypair.public_key().verify(b"two", &sig),
            Err(CryptoError::SignatureInvalid)
        );
    }

    #[test]
    fn test_deterministic_signatures() {
        let keypair = Keypair::from_bytes(&[0x42u8; 32]).unwrap();
        assert_eq!(
            keypair.sign(b"same message").as_bytes(),
            keypair.sign(b"same message").as_bytes()
        );
    }

    #[test]
    fn test_keypair_roundtrip() {
        let original = Keypair::generate();
        let restored = Keypair::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(original.public_key(), restored.public_key());
    }

    #[test]
    fn test_pubkey_hex_roundtrip() {
        let pk = Keypair::generate().public_key();
        assert_eq!(PublicKey::from_hex(&pk.to_hex()).unwrap(), pk);
    }

    #[test]
    fn test_rejects_off_curve_pubkey() {
        assert_eq!(
            PublicKey::from_bytes([0xFFu8; 33]),
            Err(CryptoError::InvalidPublicKey)
        );
    }

    #[test]
    fn test_identity_digest_is_stable() {
        let pk = Keypair::from_bytes(&[7u8; 32]).unwrap().public_key();
        assert_eq!(pk.identity_digest(), pk.identity_digest());
    }
}
