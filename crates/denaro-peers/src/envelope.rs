//! The signed-request envelope.
//!
//! Authenticated peer calls carry five headers; the signature covers
//! `method ‖ path ‖ timestamp ‖ SHA-256(body)`, newline-separated.
//! Acceptance requires the timestamp within ±30 s and the public key to
//! hash to the claimed node id.

use crate::identity::NodeIdentity;
use denaro_crypto::{sha256_hex, PublicKey, Signature};
use denaro_types::constants::ENVELOPE_MAX_SKEW_SECS;
use denaro_types::NodeError;

pub const HDR_NODE_ID: &str = "x-node-id";
pub const HDR_PUBKEY: &str = "x-node-pubkey";
pub const HDR_VERSION: &str = "x-node-version";
pub const HDR_TIMESTAMP: &str = "x-timestamp";
pub const HDR_SIGNATURE: &str = "x-signature";

/// The five authentication headers of a signed peer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub node_id: String,
    pub pubkey: String,
    pub node_version: String,
    pub timestamp: u64,
    pub signature: String,
}

fn signing_preimage(method: &str, path: &str, timestamp: u64, body: &[u8]) -> Vec<u8> {
    format!(
        "{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        path,
        timestamp,
        sha256_hex(body)
    )
    .into_bytes()
}

/// Build the envelope for an outbound request.
pub fn sign_request(
    identity: &NodeIdentity,
    method: &str,
    path: &str,
    body: &[u8],
    now: u64,
) -> Envelope {
    let preimage = signing_preimage(method, path, now, body);
    Envelope {
        node_id: identity.node_id().to_string(),
        pubkey: identity.pubkey_hex().to_string(),
        node_version: denaro_types::constants::NODE_VERSION.to_string(),
        timestamp: now,
        signature: identity.sign(&preimage).to_hex(),
    }
}

/// Verify an inbound envelope; returns the authenticated node id.
pub fn verify_envelope(
    envelope: &Envelope,
    method: &str,
    path: &str,
    body: &[u8],
    now: u64,
) -> Result<String, NodeError> {
    let skew = now.abs_diff(envelope.timestamp);
    if skew > ENVELOPE_MAX_SKEW_SECS {
        return Err(NodeError::PeerUnauthenticated(format!(
            "timestamp skew {skew}s exceeds {ENVELOPE_MAX_SKEW_SECS}s"
        )));
    }
    let pubkey = PublicKey::from_hex(&envelope.pubkey)
        .map_err(|_| NodeError::PeerUnauthenticated("public key unparseable".into()))?;
    if hex::encode(pubkey.identity_digest()) != envelope.node_id {
        return Err(NodeError::PeerUnauthenticated(
            "node id does not match public key".into(),
        ));
    }
    let signature = Signature::from_hex(&envelope.signature)
        .map_err(|_| NodeError::PeerUnauthenticated("signature unparseable".into()))?;
    let preimage = signing_preimage(method, path, envelope.timestamp, body);
    pubkey
        .verify(&preimage, &signature)
        .map_err(|_| NodeError::PeerUnauthenticated("signature verification failed".into()))?;
    Ok(envelope.node_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use denaro_crypto::Keypair;

    fn identity() -> NodeIdentity {
        NodeIdentity::from_keypair(Keypair::from_bytes(&[9u8; 32]).unwrap())
    }

    #[test]
    fn test_roundtrip_accepts() {
        let id = identity();
        let env = sign_request(&id, "POST", "/push_block", b"{\"id\":5}", 1_000);
        let verified = verify_envelope(&env, "POST", "/push_block", b"{\"id\":5}", 1_010).unwrap();
        assert_eq!(verified, id.node_id());
    }

    #[test]
    fn test_skew_window_is_thirty_seconds() {
        let id = identity();
        let env = sign_request(&id, "GET", "/get_peers", b"", 1_000);
        assert!(verify_envelope(&env, "GET", "/get_peers", b"", 1_030).is_ok());
        assert!(matches!(
            verify_envelope(&env, "GET", "/get_peers", b"", 1_031),
            Err(NodeError::PeerUnauthenticated(_))
        ));
        // The window is two-sided.
        assert!(verify_envelope(&env, "GET", "/get_peers", b"", 970).is_ok());
        assert!(verify_envelope(&env, "GET", "/get_peers", b"", 969).is_err());
    }

    #[test]
    fn test_body_tampering_fails() {
        let id = identity();
        let env = sign_request(&id, "POST", "/push_tx", b"original", 1_000);
        assert!(verify_envelope(&env, "POST", "/push_tx", b"tampered", 1_000).is_err());
    }

    #[test]
    fn test_path_and_method_are_bound() {
        let id = identity();
        let env = sign_request(&id, "POST", "/push_block", b"x", 1_000);
        assert!(verify_envelope(&env, "POST", "/push_blocks", b"x", 1_000).is_err());
        assert!(verify_envelope(&env, "GET", "/push_block", b"x", 1_000).is_err());
    }

    #[test]
    fn test_forged_node_id_rejected() {
        let id = identity();
        let mut env = sign_request(&id, "GET", "/get_peers", b"", 1_000);
        env.node_id = "ab".repeat(32);
        assert!(matches!(
            verify_envelope(&env, "GET", "/get_peers", b"", 1_000),
            Err(NodeError::PeerUnauthenticated(_))
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let id = identity();
        let other = NodeIdentity::from_keypair(Keypair::from_bytes(&[7u8; 32]).unwrap());
        let mut env = sign_request(&id, "GET", "/get_peers", b"", 1_000);
        // Claim the other node's identity wholesale; the signature no longer
        // matches the presented key.
        env.node_id = other.node_id().to_string();
        env.pubkey = other.pubkey_hex().to_string();
        assert!(verify_envelope(&env, "GET", "/get_peers", b"", 1_000).is_err());
    }
}
