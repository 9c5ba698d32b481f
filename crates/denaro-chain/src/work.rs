//! Cumulative-work arithmetic.
//!
//! The work of a block at difficulty `d` is `16^d = 2^(4d)`. Sums are taken
//! in `f64` over reorg-window-sized slices, where the dominant term dwarfs
//! rounding error; ties fall to the first-observed branch.

use denaro_types::Difficulty;

/// Work contributed by a single block.
pub fn block_work(difficulty: Difficulty) -> f64 {
    // 2^(4 · tenths / 10)
    (2f64).powf(0.4 * f64::from(difficulty.tenths()))
}

/// Total work over a sequence of difficulties.
pub fn chain_work<I: IntoIterator<Item = Difficulty>>(difficulties: I) -> f64 {
    difficulties.into_iter().map(block_work).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_work_matches_powers_of_16() {
        assert_eq!(block_work(Difficulty::from_tenths(10)), 16.0);
        assert_eq!(block_work(Difficulty::from_tenths(30)), 4096.0);
    }

    #[test]
    fn test_higher_difficulty_dominates_length() {
        // One block at 7.0 outweighs a hundred at 6.0.
        let one_heavy = chain_work([Difficulty::from_tenths(70)]);
        let many_light = chain_work(vec![Difficulty::from_tenths(60); 100]);
        assert!(one_heavy > many_light);
    }

    #[test]
    fn test_longer_chain_wins_at_equal_difficulty() {
        let short = chain_work(vec![Difficulty::from_tenths(60); 2]);
        let long = chain_work(vec![Difficulty::from_tenths(60); 3]);
        assert!(long > short);
    }
}
