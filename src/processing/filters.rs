// SPDX-License-Identifier: GPL-3.0-only

//! Depth smoothing filters
//!
//! Spatial filters work on one frame with replicated borders. The temporal
//! filter keeps the last K frames that entered the filter stage and averages
//! each pixel over the non-zero samples only, so dropouts do not pull the
//! surface towards the camera.

use super::DepthBuffer;
use crate::constants::filters::{
    DEFAULT_SPATIAL_KERNEL, DEFAULT_TEMPORAL_WINDOW, MAX_TEMPORAL_WINDOW,
};
use crate::constants::hole_fill::HOLE_EPSILON;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Filter applied after hole filling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    #[default]
    None,
    /// Box mean over a square kernel
    SpatialMean,
    /// Median over a square kernel
    SpatialMedian,
    /// Mean of the non-zero samples over the last K frames
    Temporal,
}

impl std::fmt::Display for FilterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterType::None => write!(f, "none"),
            FilterType::SpatialMean => write!(f, "mean"),
            FilterType::SpatialMedian => write!(f, "median"),
            FilterType::Temporal => write!(f, "temporal"),
        }
    }
}

/// Stateful depth filter stage
#[derive(Debug, Clone)]
pub struct DepthFilter {
    filter_type: FilterType,
    kernel_size: usize,
    window: usize,
    history: VecDeque<Vec<f32>>,
    resolution: Option<(u32, u32)>,
}

impl Default for DepthFilter {
    fn default() -> Self {
        Self::new(FilterType::None, DEFAULT_SPATIAL_KERNEL, DEFAULT_TEMPORAL_WINDOW)
    }
}

impl DepthFilter {
    pub fn new(filter_type: FilterType, kernel_size: usize, window: usize) -> Self {
        let mut filter = Self {
            filter_type,
            kernel_size: DEFAULT_SPATIAL_KERNEL,
            window: DEFAULT_TEMPORAL_WINDOW,
            history: VecDeque::new(),
            resolution: None,
        };
        filter.set_kernel_size(kernel_size);
        filter.set_temporal_window(window);
        filter
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    /// Switch filter type, dropping the temporal history when leaving temporal mode
    pub fn set_filter_type(&mut self, filter_type: FilterType) {
        if self.filter_type == FilterType::Temporal && filter_type != FilterType::Temporal {
            debug!(cached = self.history.len(), "Temporal filter cache invalidated");
            self.history.clear();
            self.resolution = None;
        }
        self.filter_type = filter_type;
    }

    /// Kernel side length, forced odd and at least 1
    pub fn set_kernel_size(&mut self, size: usize) {
        self.kernel_size = size.max(1) | 1;
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// Number of frames averaged by the temporal filter
    pub fn set_temporal_window(&mut self, window: usize) {
        self.window = window.clamp(1, MAX_TEMPORAL_WINDOW);
        while self.history.len() > self.window {
            self.history.pop_front();
        }
    }

    pub fn temporal_window(&self) -> usize {
        self.window
    }

    /// Frames currently cached by the temporal filter
    pub fn cached_frames(&self) -> usize {
        self.history.len()
    }

    /// Run the configured filter
    pub fn apply(&mut self, buffer: DepthBuffer) -> DepthBuffer {
        match self.filter_type {
            FilterType::None => buffer,
            FilterType::SpatialMean => spatial_mean(&buffer, self.kernel_size),
            FilterType::SpatialMedian => spatial_median(&buffer, self.kernel_size),
            FilterType::Temporal => self.temporal(buffer),
        }
    }

    fn temporal(&mut self, buffer: DepthBuffer) -> DepthBuffer {
        let resolution = (buffer.width, buffer.height);
        if self.resolution != Some(resolution) {
            if !self.history.is_empty() {
                debug!(?resolution, "Resolution changed, resetting temporal filter");
            }
            self.history.clear();
            self.resolution = Some(resolution);
        }

        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(buffer.data);

        let pixels = resolution.0 as usize * resolution.1 as usize;
        let mut out = vec![0.0f32; pixels];
        for (i, value) in out.iter_mut().enumerate() {
            let mut sum = 0.0f32;
            let mut count = 0u32;
            for frame in &self.history {
                let v = frame[i];
                if v >= HOLE_EPSILON {
                    sum += v;
                    count += 1;
                }
            }
            if count > 0 {
                *value = sum / count as f32;
            }
        }

        DepthBuffer::from_vec(resolution.0, resolution.1, out)
    }
}

/// Collect the kernel neighbourhood of (x, y) with replicated borders
#[inline]
fn gather(buffer: &DepthBuffer, x: u32, y: u32, radius: i64, out: &mut Vec<f32>) {
    out.clear();
    let max_x = buffer.width as i64 - 1;
    let max_y = buffer.height as i64 - 1;
    for dy in -radius..=radius {
        let sy = (y as i64 + dy).clamp(0, max_y) as u32;
        for dx in -radius..=radius {
            let sx = (x as i64 + dx).clamp(0, max_x) as u32;
            out.push(buffer.get(sx, sy));
        }
    }
}

/// Box mean blur
pub fn spatial_mean(buffer: &DepthBuffer, kernel_size: usize) -> DepthBuffer {
    let radius = (kernel_size / 2) as i64;
    if radius == 0 {
        return buffer.clone();
    }
    let mut window = Vec::with_capacity(kernel_size * kernel_size);
    let mut out = Vec::with_capacity(buffer.data.len());
    for y in 0..buffer.height {
        for x in 0..buffer.width {
            gather(buffer, x, y, radius, &mut window);
            out.push(window.iter().sum::<f32>() / window.len() as f32);
        }
    }
    DepthBuffer::from_vec(buffer.width, buffer.height, out)
}

/// Median blur
pub fn spatial_median(buffer: &DepthBuffer, kernel_size: usize) -> DepthBuffer {
    let radius = (kernel_size / 2) as i64;
    if radius == 0 {
        return buffer.clone();
    }
    let mut window = Vec::with_capacity(kernel_size * kernel_size);
    let mut out = Vec::with_capacity(buffer.data.len());
    for y in 0..buffer.height {
        for x in 0..buffer.width {
            gather(buffer, x, y, radius, &mut window);
            let mid = window.len() / 2;
            let (_, median, _) = window.select_nth_unstable_by(mid, f32::total_cmp);
            out.push(*median);
        }
    }
    DepthBuffer::from_vec(buffer.width, buffer.height, out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(values: &[f32]) -> DepthBuffer {
        DepthBuffer::from_vec(values.len() as u32, 1, values.to_vec())
    }

    #[test]
    fn test_temporal_mean_ignores_zero() {
        let mut filter = DepthFilter::new(FilterType::Temporal, 3, 3);
        filter.apply(frame(&[100.0, 0.0]));
        filter.apply(frame(&[0.0, 0.0]));
        let out = filter.apply(frame(&[400.0, 0.0]));
        assert_eq!(out.data, vec![250.0, 0.0]);
    }

    #[test]
    fn test_temporal_window_slides() {
        let mut filter = DepthFilter::new(FilterType::Temporal, 3, 2);
        filter.apply(frame(&[100.0]));
        filter.apply(frame(&[200.0]));
        let out = filter.apply(frame(&[400.0]));
        // Only the last two frames count
        assert_eq!(out.data, vec![300.0]);
        assert_eq!(filter.cached_frames(), 2);
    }

    #[test]
    fn test_temporal_warmup_uses_frames_seen() {
        let mut filter = DepthFilter::new(FilterType::Temporal, 3, 5);
        let out = filter.apply(frame(&[120.0]));
        assert_eq!(out.data, vec![120.0]);
    }

    #[test]
    fn test_leaving_temporal_clears_cache() {
        let mut filter = DepthFilter::new(FilterType::Temporal, 3, 4);
        filter.apply(frame(&[100.0]));
        filter.apply(frame(&[100.0]));
        filter.set_filter_type(FilterType::SpatialMean);
        assert_eq!(filter.cached_frames(), 0);

        filter.set_filter_type(FilterType::Temporal);
        let out = filter.apply(frame(&[700.0]));
        assert_eq!(out.data, vec![700.0]);
    }

    #[test]
    fn test_resolution_change_resets_history() {
        let mut filter = DepthFilter::new(FilterType::Temporal, 3, 4);
        filter.apply(frame(&[100.0, 100.0]));
        let out = filter.apply(frame(&[300.0]));
        assert_eq!(out.data, vec![300.0]);
        assert_eq!(filter.cached_frames(), 1);
    }

    #[test]
    fn test_spatial_mean_replicates_border() {
        let buf = DepthBuffer::from_vec(3, 1, vec![0.0, 30.0, 60.0]);
        let out = spatial_mean(&buf, 3);
        // Edge pixel sees [0, 0, 30] on each of three replicated rows
        assert!((out.data[0] - 10.0).abs() < 1e-4);
        assert!((out.data[1] - 30.0).abs() < 1e-4);
        assert!((out.data[2] - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_spatial_median_removes_speckle() {
        let mut buf = DepthBuffer::filled(5, 5, 1000.0);
        buf.set(2, 2, 4000.0);
        let out = spatial_median(&buf, 3);
        assert_eq!(out.get(2, 2), 1000.0);
    }

    #[test]
    fn test_even_kernel_rounded_up() {
        let filter = DepthFilter::new(FilterType::SpatialMean, 4, 5);
        assert_eq!(filter.kernel_size(), 5);
    }
}
