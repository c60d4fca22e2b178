//! Size-segregated bins for free chunks.
//!
//! Small sizes get fine-grained bins, so a search for a small request only
//! scans chunks of nearly the right size. Larger sizes share coarse bins,
//! which bounds the number of bins a search has to walk.
//!
//! | sizes               | index            | bins   |
//! |---------------------|------------------|--------|
//! | `sz < 64`           | `sz >> 1`        | 0–31   |
//! | `64 ≤ sz < 320`     | `28 + (sz >> 4)` | 32–47  |
//! | `320 ≤ sz < 1344`   | `46 + (sz >> 7)` | 48–55  |
//! | `1344 ≤ sz < 5440`  | `55 + (sz >> 10)`| 56–59  |
//! | `5440 ≤ sz < 21824` | `59 + (sz >> 13)`| 60–61  |
//! | `sz ≥ 21824`        | catch-all        | 62     |
//!
//! The tier thresholds are not powers of two, so the shifted formulas run
//! past their tier's bins near the edges. The index is clamped to the tier's
//! range: sizes 1280–1343 go to bin 55, 5120–5439 to bin 59 and 5440–8191 to
//! bin 60.

use static_assertions::const_assert;

/// Total number of bins.
pub const BIN_COUNT: usize = 63;

// (lower threshold, index offset, log2 of the granularity, first bin, last bin)
type Tier = (u32, usize, u32, usize, usize);

const TIER_1: Tier = (64, 28, 4, 32, 47);
const TIER_2: Tier = (320, 46, 7, 48, 55);
const TIER_3: Tier = (1344, 55, 10, 56, 59);
const TIER_4: Tier = (5440, 59, 13, 60, 61);
const CATCH_ALL: u32 = 21824;

const fn tier_bin(size: u32, tier: Tier) -> usize {
    let (_, offset, shift, first, last) = tier;
    let bin = offset + (size >> shift) as usize;
    if bin < first {
        first
    } else if bin > last {
        last
    } else {
        bin
    }
}

/// Map a chunk size to the bin holding free chunks of that size.
///
/// The result is always below [`BIN_COUNT`], and never decreases as `size`
/// grows.
pub const fn bin_index(size: u32) -> usize {
    if size < TIER_1.0 {
        (size >> 1) as usize
    } else if size < TIER_2.0 {
        tier_bin(size, TIER_1)
    } else if size < TIER_3.0 {
        tier_bin(size, TIER_2)
    } else if size < TIER_4.0 {
        tier_bin(size, TIER_3)
    } else if size < CATCH_ALL {
        tier_bin(size, TIER_4)
    } else {
        BIN_COUNT - 1
    }
}

// Each tier ends exactly one bin before the next one starts.
const_assert!(bin_index(TIER_1.0 - 1) == 31);
const_assert!(bin_index(TIER_1.0) == 32);
const_assert!(bin_index(TIER_2.0 - 1) == 47);
const_assert!(bin_index(TIER_2.0) == 48);
const_assert!(bin_index(TIER_3.0 - 1) == 55);
const_assert!(bin_index(TIER_3.0) == 56);
const_assert!(bin_index(TIER_4.0 - 1) == 59);
const_assert!(bin_index(TIER_4.0) == 60);
const_assert!(bin_index(CATCH_ALL - 1) == 61);
const_assert!(bin_index(CATCH_ALL) == BIN_COUNT - 1);
const_assert!(bin_index(u32::MAX) == BIN_COUNT - 1);

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn test_small_sizes() {
        assert_eq!(bin_index(0), 0);
        assert_eq!(bin_index(1), 0);
        assert_eq!(bin_index(2), 1);
        assert_eq!(bin_index(3), 1);
        assert_eq!(bin_index(63), 31);
    }

    #[test]
    fn test_tier_granularity() {
        // 16 byte steps
        assert_eq!(bin_index(79), 32);
        assert_eq!(bin_index(80), 33);
        // 128 byte steps, on multiples of 128
        assert_eq!(bin_index(383), 48);
        assert_eq!(bin_index(384), 49);
        // 1024 byte steps
        assert_eq!(bin_index(2047), 56);
        assert_eq!(bin_index(2048), 57);
        // 8192 byte steps
        assert_eq!(bin_index(16383), 60);
        assert_eq!(bin_index(16384), 61);
    }

    #[test]
    fn test_tier_edges_are_clamped() {
        assert_eq!(bin_index(1279), 55);
        assert_eq!(bin_index(1280), 55);
        assert_eq!(bin_index(1343), 55);
        assert_eq!(bin_index(5119), 59);
        assert_eq!(bin_index(5120), 59);
        assert_eq!(bin_index(5439), 59);
        assert_eq!(bin_index(5440), 60);
        assert_eq!(bin_index(8191), 60);
        assert_eq!(bin_index(8192), 60);
    }

    #[test]
    fn test_monotonic() {
        let mut previous = 0;
        for size in 0..=CATCH_ALL + 1024 {
            let bin = bin_index(size);
            assert!(bin < BIN_COUNT);
            assert!(
                bin >= previous,
                "bin_index({}) = {} < bin_index({}) = {}",
                size,
                bin,
                size - 1,
                previous
            );
            assert!(bin <= previous + 1);
            previous = bin;
        }
    }
}
