//! Address codec.
//!
//! An address is 45 characters: a parity prefix (`D` for an even
//! y-coordinate, `E` for odd) followed by 44 base-58 characters encoding the
//! 32-byte x-coordinate, left-padded with `1`. Decoding reconstructs the
//! compressed curve point, so any in-alphabet tampering that leaves the
//! curve is rejected.

use crate::ecdsa::PublicKey;
use crate::errors::CryptoError;

const ADDRESS_LEN: usize = 45;
const TAIL_LEN: usize = 44;

/// Render the address of a public key.
pub fn address_from_pubkey(pubkey: &PublicKey) -> String {
    let bytes = pubkey.as_bytes();
    let prefix = if bytes[0] == 0x02 { 'D' } else { 'E' };
    let tail = bs58::encode(&bytes[1..]).into_string();
    let mut out = String::with_capacity(ADDRESS_LEN);
    out.push(prefix);
    for _ in tail.len()..TAIL_LEN {
        out.push('1');
    }
    out.push_str(&tail);
    out
}

/// Recover the public key an address stands for.
pub fn pubkey_from_address(address: &str) -> Result<PublicKey, CryptoError> {
    if address.len() != ADDRESS_LEN {
        return Err(CryptoError::MalformedInput(
            "address must be 45 characters".into(),
        ));
    }
    let mut chars = address.chars();
    let tag = match chars.next() {
        Some('D') => 0x02u8,
        Some('E') => 0x03u8,
        _ => {
            return Err(CryptoError::MalformedInput(
                "address must start with D or E".into(),
            ))
        }
    };
    let tail: &str = &address[1..];
    let decoded = bs58::decode(tail)
        .into_vec()
        .map_err(|_| CryptoError::MalformedInput("address tail is not base58".into()))?;
    // Padding chars decode to leading zero bytes; strip down to 32 bytes.
    let mut x = [0u8; 32];
    if decoded.len() > 32 {
        let extra = decoded.len() - 32;
        if decoded[..extra].iter().any(|&b| b != 0) {
            return Err(CryptoError::MalformedInput("address tail too long".into()));
        }
        x.copy_from_slice(&decoded[extra..]);
    } else {
        x[32 - decoded.len()..].copy_from_slice(&decoded);
    }
    let mut sec1 = [0u8; 33];
    sec1[0] = tag;
    sec1[1..].copy_from_slice(&x);
    PublicKey::from_bytes(sec1).map_err(|_| CryptoError::InvalidPublicKey)
}

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Cheap shape check without point decompression.
pub fn is_valid_address(address: &str) -> bool {
    address.len() == ADDRESS_LEN
        && address.starts_with(['D', 'E'])
        && address[1..].bytes().all(|b| BASE58_ALPHABET.contains(&b))
}
