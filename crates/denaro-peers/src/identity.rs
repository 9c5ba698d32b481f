//! Node identity.
//!
//! A P-256 keypair generated on first start and persisted as hex in a
//! mode-0600 file. The node id is the SHA-256 of the compressed public key,
//! stable across restarts.

use denaro_crypto::{Keypair, PublicKey, Signature};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity file unreadable: {0}")]
    Io(String),

    #[error("identity file corrupt: {0}")]
    Corrupt(String),
}

pub struct NodeIdentity {
    keypair: Keypair,
    node_id: String,
    pubkey_hex: String,
}

impl NodeIdentity {
    /// Load the key file, or generate and persist a fresh keypair.
    pub fn load_or_generate(path: &Path) -> Result<NodeIdentity, IdentityError> {
        let keypair = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| IdentityError::Io(e.to_string()))?;
            let bytes = hex::decode(contents.trim())
                .map_err(|_| IdentityError::Corrupt("secret key is not hex".into()))?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| IdentityError::Corrupt("secret key must be 32 bytes".into()))?;
            Keypair::from_bytes(&bytes)
                .map_err(|e| IdentityError::Corrupt(e.to_string()))?
        } else {
            let keypair = Keypair::generate();
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).map_err(|e| IdentityError::Io(e.to_string()))?;
            }
            std::fs::write(path, hex::encode(keypair.to_bytes()))
                .map_err(|e| IdentityError::Io(e.to_string()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                    .map_err(|e| IdentityError::Io(e.to_string()))?;
            }
            keypair
        };
        Ok(Self::from_keypair(keypair))
    }

    pub fn from_keypair(keypair: Keypair) -> NodeIdentity {
        let public = keypair.public_key();
        NodeIdentity {
            node_id: hex::encode(public.identity_digest()),
            pubkey_hex: public.to_hex(),
            keypair,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn pubkey_hex(&self) -> &str {
        &self.pubkey_hex
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_key.hex");
        let first = NodeIdentity::load_or_generate(&path).unwrap();
        let second = NodeIdentity::load_or_generate(&path).unwrap();
        assert_eq!(first.node_id(), second.node_id());
        assert_eq!(first.pubkey_hex(), second.pubkey_hex());
    }

    #[test]
    fn test_node_id_is_64_hex_chars() {
        let identity = NodeIdentity::from_keypair(Keypair::generate());
        assert_eq!(identity.node_id().len(), 64);
        assert!(identity.node_id().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_key.hex");
        std::fs::write(&path, "not hex at all").unwrap();
        assert!(matches!(
            NodeIdentity::load_or_generate(&path),
            Err(IdentityError::Corrupt(_))
        ));
    }
}
