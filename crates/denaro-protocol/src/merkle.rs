//! Merkle-like root over the block's transaction hashes.
//!
//! Pairwise SHA-256 over the ordered non-coinbase hashes, duplicating the
//! last node on odd widths. The empty set hashes to SHA-256 of nothing.

use denaro_crypto::{sha256, Sha256Stream};
use denaro_types::Hash;

pub fn merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return sha256(b"");
    }
    let mut level: Vec<Hash> = hashes.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            let mut stream = Sha256Stream::new();
            stream.update(&pair[0]).update(right);
            next.push(stream.finalize());
        }
        level = next;
    }
    level[0]
}
