//! The binary chain locator.
//!
//! To find the common ancestor with a diverged peer, heights are probed
//! densely near the tip and exponentially sparser further back:
//! `h, h−1, h−2, h−4, h−8, …, 1`.

/// Heights to probe, walking back from the local tip.
pub fn locator_heights(tip: u64) -> Vec<u64> {
    let mut heights = Vec::new();
    if tip == 0 {
        return heights;
    }
    heights.push(tip);
    let mut step = 1u64;
    while step < tip {
        heights.push(tip - step);
        step = step.saturating_mul(2);
    }
    if heights.last() != Some(&1) {
        heights.push(1);
    }
    heights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_tips() {
        assert!(locator_heights(0).is_empty());
        assert_eq!(locator_heights(1), vec![1]);
        assert_eq!(locator_heights(2), vec![2, 1]);
        assert_eq!(locator_heights(3), vec![3, 2, 1]);
    }

    #[test]
    fn test_exponential_backoff() {
        assert_eq!(locator_heights(100), vec![100, 99, 98, 96, 92, 84, 68, 36, 1]);
    }

    #[test]
    fn test_always_ends_at_genesis() {
        for tip in [5u64, 17, 513, 1_000_000] {
            let heights = locator_heights(tip);
            assert_eq!(heights.first(), Some(&tip));
            assert_eq!(heights.last(), Some(&1));
            assert!(heights.windows(2).all(|w| w[0] > w[1]), "strictly descending");
        }
    }
}
