//! Fixed-point exponentially weighted moving average of packet rates.
//!
//! The average is stored scaled by `1 << EWMA_SHIFT`. Each update decays
//! the previous value by `1 / 2^EWMA_SHIFT` and adds the packets seen in the
//! last interval, so for a constant per-interval delta `d` the stored value
//! converges to `d << EWMA_SHIFT` from below without overshoot.

/// Smoothing shift constant.
pub const EWMA_SHIFT: u32 = 8;

/// Folds one interval's packet increment into the average.
pub fn ewma_update(average: u64, delta: u64) -> u64 {
    average - (average >> EWMA_SHIFT) + delta
}

/// Converts a stored average into packets per interval.
pub fn packets_per_interval(average: u64) -> u64 {
    average >> EWMA_SHIFT
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_zero_stays_zero() {
        assert_eq!(ewma_update(0, 0), 0);
    }

    #[test]
    fn test_converges_monotonically_without_overshoot() {
        let delta = 100;
        let mut avg = 0;
        let mut prev = 0;
        for _ in 0..4096 {
            avg = ewma_update(avg, delta);
            assert!(avg >= prev);
            assert!(packets_per_interval(avg) <= delta);
            prev = avg;
        }
        assert_eq!(packets_per_interval(avg), delta);
    }

    #[test]
    fn test_decays_toward_new_rate() {
        let mut avg = 1000 << EWMA_SHIFT;
        let mut prev = avg;
        for _ in 0..4096 {
            avg = ewma_update(avg, 10);
            assert!(avg <= prev);
            prev = avg;
        }
        assert!(packets_per_interval(avg) >= 10);
        assert!(packets_per_interval(avg) <= 11);
    }

    #[test]
    fn test_preserves_ranking() {
        let (mut hot, mut cold) = (0, 0);
        for _ in 0..64 {
            hot = ewma_update(hot, 500);
            cold = ewma_update(cold, 20);
            assert!(hot > cold);
        }
    }
}
