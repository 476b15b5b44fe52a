// SPDX-License-Identifier: GPL-3.0-only

//! Depth-to-color frame alignment
//!
//! Depth and color run on independent clocks and counters, so the color
//! frame belonging to a depth frame is the one with the nearest timestamp.

use super::timestamps::TimestampLists;

/// Index of the color timestamp nearest to `target`
///
/// Converging bisection seeded at `hint` (the depth index) rather than the
/// middle of the list. It narrows `[start, end]` until the two are adjacent
/// and picks the closer endpoint, preferring `start` on a tie.
pub fn nearest_timestamp(timestamps: &[u64], target: u64, hint: usize) -> Option<usize> {
    if timestamps.is_empty() {
        return None;
    }
    let mut start = 0usize;
    let mut end = timestamps.len() - 1;
    let mut mid = hint.min(end);

    while end - start > 1 {
        if timestamps[mid] > target {
            end = mid;
        } else {
            start = mid;
        }
        mid = (start + end) / 2;
    }

    if timestamps[start].abs_diff(target) <= timestamps[end].abs_diff(target) {
        Some(start)
    } else {
        Some(end)
    }
}

/// Color index matched to a depth index
///
/// Falls back to the identical index (clamped to the color list) when the
/// timestamps are not trustworthy.
pub fn aligned_color_index(
    timestamps: &TimestampLists,
    depth_index: usize,
    timestamps_valid: bool,
) -> Option<usize> {
    if timestamps.rgb.is_empty() {
        return None;
    }
    let identity = depth_index.min(timestamps.rgb.len() - 1);
    if !timestamps_valid {
        return Some(identity);
    }
    match timestamps.depth.get(depth_index) {
        Some(&target) => nearest_timestamp(&timestamps.rgb, target, depth_index),
        None => Some(identity),
    }
}

/// Alignment of every depth frame
pub fn alignment_table(timestamps: &TimestampLists, timestamps_valid: bool) -> Vec<Option<usize>> {
    (0..timestamps.depth.len())
        .map(|i| aligned_color_index(timestamps, i, timestamps_valid))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let ts = [10, 20, 30, 40];
        assert_eq!(nearest_timestamp(&ts, 30, 0), Some(2));
        assert_eq!(nearest_timestamp(&ts, 30, 3), Some(2));
    }

    #[test]
    fn test_tie_prefers_lower_index() {
        assert_eq!(nearest_timestamp(&[10, 20], 15, 1), Some(0));
    }

    #[test]
    fn test_out_of_range_targets() {
        let ts = [100, 200, 300];
        assert_eq!(nearest_timestamp(&ts, 5, 2), Some(0));
        assert_eq!(nearest_timestamp(&ts, 1000, 0), Some(2));
        assert_eq!(nearest_timestamp(&[7], 1000, 4), Some(0));
        assert_eq!(nearest_timestamp(&[], 1, 0), None);
    }

    #[test]
    fn test_invalid_timestamps_use_identity() {
        let lists = TimestampLists {
            depth: vec![0, 0, 0],
            rgb: vec![5, 6],
        };
        assert_eq!(aligned_color_index(&lists, 1, false), Some(1));
        assert_eq!(aligned_color_index(&lists, 2, false), Some(1));
    }

    #[test]
    fn test_offset_clocks() {
        let lists = TimestampLists {
            depth: vec![1000, 2000, 3000, 4000],
            rgb: vec![1900, 2900, 3900],
        };
        assert_eq!(
            alignment_table(&lists, true),
            vec![Some(0), Some(0), Some(1), Some(2)]
        );
    }
}
