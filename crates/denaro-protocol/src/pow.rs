//! The fractional-difficulty proof-of-work predicate.
//!
//! Let `d = ⌊difficulty⌋` and `f` its fractional part. A candidate hash is
//! valid against its predecessor when it starts with the last `d` hex
//! characters of the predecessor's hash, and, when `f > 0`, its character
//! at position `d` falls within the first `⌈16·(1−f)⌉` characters of
//! `0123456789abcdef`.

use denaro_types::Difficulty;

const HEX_CHARSET: &[u8; 16] = b"0123456789abcdef";

/// Evaluate the predicate on lowercase hex hashes.
pub fn check_pow(block_hash: &str, previous_hash: &str, difficulty: Difficulty) -> bool {
    if block_hash.len() != 64 || previous_hash.len() != 64 {
        return false;
    }
    let d = difficulty.integer_part();
    if d > 64 {
        return false;
    }
    let tail = &previous_hash[64 - d..];
    if !block_hash.starts_with(tail) {
        return false;
    }
    let f = difficulty.fraction_tenths();
    if f == 0 {
        return true;
    }
    // ⌈16·(1−f/10)⌉ = ⌈16·(10−f)/10⌉
    let count = ((16 * (10 - f as usize)) + 9) / 10;
    match block_hash.as_bytes().get(d) {
        Some(c) => HEX_CHARSET[..count].contains(c),
        None => f == 0,
    }
}
