//! Monetary and difficulty schedules.

use denaro_types::constants::{
    BLOCKS_PER_ADJUSTMENT, BLOCK_TIME, HALVING_INTERVAL, INITIAL_REWARD, MAX_HALVINGS, SMALLEST,
};
use denaro_types::{Amount, Difficulty};

/// Schedule reward for the block at 1-based `height`.
///
/// 64 coins, halving every 262 144 blocks; integer division in smallest
/// units, so the subsidy decays to zero well before the 64th halving and the
/// accumulated supply stays under the cap.
pub fn block_reward(height: u64) -> Amount {
    if height == 0 {
        return Amount::ZERO;
    }
    let halvings = (height - 1) / HALVING_INTERVAL;
    if halvings >= MAX_HALVINGS {
        return Amount::ZERO;
    }
    Amount::from_units((INITIAL_REWARD * SMALLEST) >> halvings).expect("reward fits 63 bits")
}

/// Whether a block whose parent sits at `parent_height` opens a new
/// adjustment window.
pub fn adjustment_due(parent_height: u64) -> bool {
    parent_height >= BLOCKS_PER_ADJUSTMENT && parent_height % BLOCKS_PER_ADJUSTMENT == 0
}

/// Recompute difficulty at a window boundary.
///
/// `elapsed_secs` is the wall time the closing 512-block window took. The
/// change is `log2(target / actual)` rounded to one decimal place, clamped
/// to ±1.0 per adjustment and floored at 1.0.
pub fn retarget(previous: Difficulty, elapsed_secs: u64) -> Difficulty {
    let elapsed = elapsed_secs.max(1);
    let target = (BLOCK_TIME * BLOCKS_PER_ADJUSTMENT) as f64;
    let ratio = target / elapsed as f64;
    let delta_tenths = (ratio.log2() * 10.0).round() as i32;
    let delta_tenths = delta_tenths.clamp(-10, 10);
    let new_tenths = (i32::from(previous.tenths()) + delta_tenths).max(10);
    Difficulty::from_tenths(new_tenths as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use denaro_types::constants::MAX_SUPPLY;

    #[test]
    fn test_initial_reward() {
        assert_eq!(block_reward(1), Amount::from_coins(64).unwrap());
        assert_eq!(block_reward(HALVING_INTERVAL), Amount::from_coins(64).unwrap());
    }

    #[test]
    fn test_first_halving() {
        assert_eq!(
            block_reward(HALVING_INTERVAL + 1),
            Amount::from_coins(32).unwrap()
        );
    }

    #[test]
    fn test_subsidy_ends_after_64_halvings() {
        assert_eq!(block_reward(HALVING_INTERVAL * MAX_HALVINGS + 1), Amount::ZERO);
        assert_eq!(block_reward(u64::MAX / 2), Amount::ZERO);
    }

    #[test]
    fn test_total_emission_stays_under_cap() {
        let mut total: u128 = 0;
        for halvings in 0..MAX_HALVINGS {
            let per_block = (INITIAL_REWARD * SMALLEST) >> halvings;
            total += u128::from(per_block) * u128::from(HALVING_INTERVAL);
        }
        assert!(total <= u128::from(MAX_SUPPLY) * u128::from(SMALLEST));
    }

    #[test]
    fn test_adjustment_boundaries() {
        assert!(!adjustment_due(1));
        assert!(!adjustment_due(511));
        assert!(adjustment_due(512));
        assert!(!adjustment_due(513));
        assert!(adjustment_due(1024));
    }

    #[test]
    fn test_retarget_on_target_is_stable() {
        let d = Difficulty::from_tenths(60);
        assert_eq!(retarget(d, BLOCK_TIME * BLOCKS_PER_ADJUSTMENT), d);
    }

    #[test]
    fn test_retarget_fast_window_raises() {
        let d = Difficulty::from_tenths(60);
        // Twice as fast: log2(2) = 1.0, the clamp boundary.
        let target = BLOCK_TIME * BLOCKS_PER_ADJUSTMENT;
        assert_eq!(retarget(d, target / 2), Difficulty::from_tenths(70));
        // Eight times as fast still moves at most one integer unit.
        assert_eq!(retarget(d, target / 8), Difficulty::from_tenths(70));
    }

    #[test]
    fn test_retarget_slow_window_lowers() {
        let d = Difficulty::from_tenths(60);
        let target = BLOCK_TIME * BLOCKS_PER_ADJUSTMENT;
        assert_eq!(retarget(d, target * 2), Difficulty::from_tenths(50));
        assert_eq!(retarget(d, target * 100), Difficulty::from_tenths(50));
    }

    #[test]
    fn test_retarget_fractional_step() {
        let d = Difficulty::from_tenths(60);
        let target = (BLOCK_TIME * BLOCKS_PER_ADJUSTMENT) as f64;
        // ~23% faster: log2(1.23) ≈ 0.3.
        let elapsed = (target / 1.23) as u64;
        assert_eq!(retarget(d, elapsed), Difficulty::from_tenths(63));
    }

    #[test]
    fn test_retarget_never_below_one() {
        let d = Difficulty::from_tenths(12);
        assert_eq!(
            retarget(d, BLOCK_TIME * BLOCKS_PER_ADJUSTMENT * 64),
            Difficulty::from_tenths(10)
        );
    }
}
