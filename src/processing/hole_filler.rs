// SPDX-License-Identifier: GPL-3.0-only

//! Depth hole filling
//!
//! Holes are maximal horizontal runs of near‑zero pixels. Runs in adjacent
//! rows whose extents overlap are joined into connected components with a
//! row-wise labelling pass. Each component is then judged on its own:
//!
//! - a component touching the image border is never filled, as that is
//!   usually a real depth discontinuity rather than a sensor dropout
//! - a component is filled when it is small and the valid depth around it
//!   is nearly flat
//!
//! Filling interpolates each run linearly between its left and right valid
//! neighbours.

use super::DepthBuffer;
use crate::constants::hole_fill::{HOLE_EPSILON, MAX_COMPONENT_PIXELS, MAX_NEIGHBOR_SPREAD};
use tracing::trace;

/// Horizontal run of hole pixels, `start..=end` on row `y`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    y: u32,
    start: u32,
    end: u32,
}

impl Run {
    fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Interval-overlap test between runs of adjacent rows
    fn overlaps(&self, other: &Run) -> bool {
        let span = self.end.max(other.end) - self.start.min(other.start) + 1;
        span < self.len() + other.len()
    }
}

/// Outcome counts of one fill pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillStats {
    /// Hole components found
    pub components: usize,
    /// Components that were interpolated
    pub filled: usize,
    /// Components left alone because they touch the border
    pub rejected_border: usize,
    /// Components left alone because they are too large
    pub rejected_size: usize,
    /// Components left alone because the surrounding depth is not flat
    pub rejected_spread: usize,
    /// Pixels written
    pub pixels_filled: usize,
}

/// Hole filler with configurable acceptance limits
#[derive(Debug, Clone, Copy)]
pub struct HoleFiller {
    /// Components must have fewer pixels than this
    pub max_component_pixels: usize,
    /// Maximum min-max spread of the valid neighbours (depth units)
    pub max_neighbor_spread: f32,
}

impl Default for HoleFiller {
    fn default() -> Self {
        Self {
            max_component_pixels: MAX_COMPONENT_PIXELS,
            max_neighbor_spread: MAX_NEIGHBOR_SPREAD,
        }
    }
}

#[inline]
fn is_hole(v: f32) -> bool {
    v < HOLE_EPSILON
}

/// Union-find root lookup with path halving
fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        // Keep the older label so components are numbered by first row
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[hi] = lo;
    }
}

impl HoleFiller {
    /// Fill eligible holes in place
    pub fn fill(&self, buffer: &mut DepthBuffer) -> FillStats {
        let width = buffer.width;
        let height = buffer.height;
        let mut stats = FillStats::default();
        if width == 0 || height == 0 {
            return stats;
        }

        let runs = self.find_runs(buffer);
        if runs.is_empty() {
            return stats;
        }

        // Label components: runs on row y join overlapping runs on row y-1
        let mut parent: Vec<usize> = (0..runs.len()).collect();
        let mut prev_row: std::ops::Range<usize> = 0..0;
        let mut i = 0;
        while i < runs.len() {
            let y = runs[i].y;
            let row_start = i;
            while i < runs.len() && runs[i].y == y {
                i += 1;
            }
            let current = row_start..i;
            if prev_row.end > prev_row.start && runs[prev_row.start].y + 1 == y {
                for c in current.clone() {
                    for p in prev_row.clone() {
                        if runs[c].overlaps(&runs[p]) {
                            union(&mut parent, c, p);
                        }
                    }
                }
            }
            prev_row = current;
        }

        // Group runs by root label, preserving label order
        let mut components: Vec<Vec<usize>> = Vec::new();
        let mut slot_of_root = vec![usize::MAX; runs.len()];
        for idx in 0..runs.len() {
            let root = find(&mut parent, idx);
            if slot_of_root[root] == usize::MAX {
                slot_of_root[root] = components.len();
                components.push(Vec::new());
            }
            components[slot_of_root[root]].push(idx);
        }
        stats.components = components.len();

        // Decide on every component against the unmodified buffer
        let mut accepted = Vec::new();
        for members in &components {
            let touches_border = members.iter().any(|&r| {
                let run = runs[r];
                run.y == 0 || run.y == height - 1 || run.start == 0 || run.end == width - 1
            });
            if touches_border {
                stats.rejected_border += 1;
                continue;
            }

            let pixels: usize = members.iter().map(|&r| runs[r].len() as usize).sum();
            if pixels >= self.max_component_pixels {
                stats.rejected_size += 1;
                continue;
            }

            let spread = self.neighbor_spread(buffer, members.iter().map(|&r| runs[r]));
            match spread {
                Some(s) if s <= self.max_neighbor_spread => accepted.push(members),
                _ => stats.rejected_spread += 1,
            }
        }

        for members in accepted {
            for &r in members {
                stats.pixels_filled += interpolate_run(buffer, runs[r]);
            }
            stats.filled += 1;
        }

        trace!(
            components = stats.components,
            filled = stats.filled,
            pixels = stats.pixels_filled,
            "Hole fill pass"
        );
        stats
    }

    fn find_runs(&self, buffer: &DepthBuffer) -> Vec<Run> {
        let mut runs = Vec::new();
        for y in 0..buffer.height {
            let row = buffer.row(y);
            let mut x = 0usize;
            while x < row.len() {
                if is_hole(row[x]) {
                    let start = x;
                    while x + 1 < row.len() && is_hole(row[x + 1]) {
                        x += 1;
                    }
                    runs.push(Run {
                        y,
                        start: start as u32,
                        end: x as u32,
                    });
                }
                x += 1;
            }
        }
        runs
    }

    /// Min-max spread of the valid pixels bordering a component
    ///
    /// Samples the left and right neighbour of every run plus the pixels
    /// directly above and below it. `None` when no valid neighbour exists.
    fn neighbor_spread(
        &self,
        buffer: &DepthBuffer,
        runs: impl Iterator<Item = Run>,
    ) -> Option<f32> {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        let mut sample = |v: f32| {
            if !is_hole(v) {
                min = min.min(v);
                max = max.max(v);
            }
        };

        for run in runs {
            sample(buffer.get(run.start - 1, run.y));
            sample(buffer.get(run.end + 1, run.y));
            for x in run.start..=run.end {
                sample(buffer.get(x, run.y - 1));
                sample(buffer.get(x, run.y + 1));
            }
        }

        (max >= min).then_some(max - min)
    }
}

/// Linear interpolation across one run, returns pixels written
fn interpolate_run(buffer: &mut DepthBuffer, run: Run) -> usize {
    let z1 = buffer.get(run.start - 1, run.y);
    let z2 = buffer.get(run.end + 1, run.y);
    let steps = (run.end - run.start + 2) as f32;
    for k in run.start..=run.end {
        let t = (k - run.start + 1) as f32 / steps;
        buffer.set(k, run.y, z1 + (z2 - z1) * t);
    }
    run.len() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(width: u32, height: u32, value: f32) -> DepthBuffer {
        DepthBuffer::filled(width, height, value)
    }

    #[test]
    fn test_interior_hole_is_interpolated() {
        let mut buf = plane(10, 6, 1000.0);
        // Row 2: 1000 at x=2, ramp to 1300 at x=6
        buf.set(2, 2, 1000.0);
        buf.set(6, 2, 1300.0);
        for x in 3..6 {
            buf.set(x, 2, 0.0);
        }

        let stats = HoleFiller::default().fill(&mut buf);
        assert_eq!(stats.filled, 1);
        assert_eq!(stats.pixels_filled, 3);

        // z = z1 + (z2 - z1) * (k - start + 1) / (end - start + 2)
        assert!((buf.get(3, 2) - 1075.0).abs() < 1e-3);
        assert!((buf.get(4, 2) - 1150.0).abs() < 1e-3);
        assert!((buf.get(5, 2) - 1225.0).abs() < 1e-3);
    }

    #[test]
    fn test_multi_row_component_fills_each_row() {
        let mut buf = plane(12, 8, 800.0);
        for y in 2..5 {
            for x in 4..7 {
                buf.set(x, y, 0.0);
            }
        }
        buf.set(3, 3, 900.0);
        buf.set(7, 3, 1100.0);

        let stats = HoleFiller::default().fill(&mut buf);
        assert_eq!(stats.components, 1);
        assert_eq!(stats.pixels_filled, 9);
        assert!((buf.get(5, 2) - 800.0).abs() < 1e-3);
        // Row 3 interpolates between 900 and 1100 over 4 steps
        assert!((buf.get(4, 3) - 950.0).abs() < 1e-3);
        assert!((buf.get(6, 3) - 1050.0).abs() < 1e-3);
    }

    #[test]
    fn test_border_hole_left_unchanged() {
        let mut buf = plane(8, 8, 1000.0);
        for x in 0..3 {
            buf.set(x, 4, 0.0);
        }
        // Top row hole as well
        buf.set(4, 0, 0.0);

        let stats = HoleFiller::default().fill(&mut buf);
        assert_eq!(stats.rejected_border, 2);
        assert_eq!(stats.filled, 0);
        assert_eq!(buf.get(0, 4), 0.0);
        assert_eq!(buf.get(2, 4), 0.0);
        assert_eq!(buf.get(4, 0), 0.0);
    }

    #[test]
    fn test_large_component_rejected() {
        let mut buf = plane(40, 40, 1000.0);
        // 15x15 = 225 pixels
        for y in 5..20 {
            for x in 5..20 {
                buf.set(x, y, 0.0);
            }
        }
        let stats = HoleFiller::default().fill(&mut buf);
        assert_eq!(stats.rejected_size, 1);
        assert_eq!(buf.get(10, 10), 0.0);
    }

    #[test]
    fn test_component_of_199_pixels_is_filled() {
        let mut buf = plane(240, 5, 1000.0);
        for x in 10..209 {
            buf.set(x, 2, 0.0);
        }
        let stats = HoleFiller::default().fill(&mut buf);
        assert_eq!(stats.filled, 1);
        assert_eq!(stats.pixels_filled, 199);
    }

    #[test]
    fn test_steep_surroundings_rejected() {
        let mut buf = plane(10, 5, 1000.0);
        buf.set(4, 2, 0.0);
        buf.set(5, 2, 1600.0);
        let stats = HoleFiller::default().fill(&mut buf);
        assert_eq!(stats.rejected_spread, 1);
        assert_eq!(buf.get(4, 2), 0.0);
    }

    #[test]
    fn test_diagonal_runs_are_separate_components() {
        let mut buf = plane(10, 10, 1000.0);
        buf.set(3, 3, 0.0);
        buf.set(4, 4, 0.0);
        let stats = HoleFiller::default().fill(&mut buf);
        assert_eq!(stats.components, 2);
        assert_eq!(stats.filled, 2);
    }

    #[test]
    fn test_u_shaped_component_merges() {
        // Two columns joined by a bottom row: labelled separately at first,
        // merged when the bottom run overlaps both
        let mut buf = plane(10, 8, 1000.0);
        for y in 2..5 {
            buf.set(2, y, 0.0);
            buf.set(6, y, 0.0);
        }
        for x in 2..7 {
            buf.set(x, 5, 0.0);
        }
        let stats = HoleFiller::default().fill(&mut buf);
        assert_eq!(stats.components, 1);
        assert_eq!(stats.pixels_filled, 11);
    }
}
