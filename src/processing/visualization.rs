// SPDX-License-Identifier: GPL-3.0-only

//! Depth visualization helpers
//!
//! Converts depth buffers to viewable images:
//! - Turbo colormap (blue=near, red=far)
//! - Grayscale (bright=near, dark=far)

use super::DepthBuffer;
use crate::backends::camera::DepthRange;
use crate::constants::depth::COLORMAP_BANDS;
use crate::constants::hole_fill::HOLE_EPSILON;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Color mapping used for depth previews
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Colormap {
    #[default]
    Turbo,
    Grayscale,
}

/// Preview rendering options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Colorize {
    pub range: DepthRange,
    /// Millimetres per depth unit
    pub depth_scale: f32,
    pub colormap: Colormap,
    /// Quantize to bands for smoother visualization
    pub quantize: bool,
}

/// Turbo colormap: perceptually uniform rainbow (blue=near, red=far)
///
/// Based on: https://ai.googleblog.com/2019/08/turbo-improved-rainbow-colormap-for.html
/// Simplified version with polynomial approximation.
#[inline]
fn turbo(t: f32) -> [u8; 3] {
    let r = (0.13572138
        + t * (4.6153926 + t * (-42.66032 + t * (132.13108 + t * (-152.54825 + t * 59.28144)))))
        .clamp(0.0, 1.0);
    let g = (0.09140261
        + t * (2.19418 + t * (4.84296 + t * (-14.18503 + t * (4.27805 + t * 2.53377)))))
        .clamp(0.0, 1.0);
    let b = (0.1066733
        + t * (12.64194 + t * (-60.58204 + t * (109.99648 + t * (-82.52904 + t * 20.43388)))))
        .clamp(0.0, 1.0);
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}

impl Colorize {
    /// Color of one depth sample (depth units)
    #[inline]
    pub fn pixel(&self, depth: f32) -> [u8; 3] {
        if depth < HOLE_EPSILON {
            return [0, 0, 0];
        }
        let span = (self.range.max_mm - self.range.min_mm).max(f32::EPSILON);
        let mut t = ((depth * self.depth_scale - self.range.min_mm) / span).clamp(0.0, 1.0);
        if self.quantize {
            t = (t * COLORMAP_BANDS).floor() / COLORMAP_BANDS;
        }
        match self.colormap {
            Colormap::Turbo => turbo(t),
            Colormap::Grayscale => {
                let gray = ((1.0 - t) * 255.0) as u8;
                [gray, gray, gray]
            }
        }
    }

    /// Render a whole buffer
    pub fn render(&self, buffer: &DepthBuffer) -> RgbImage {
        let mut rgb = Vec::with_capacity(buffer.data.len() * 3);
        for &d in &buffer.data {
            rgb.extend_from_slice(&self.pixel(d));
        }
        RgbImage::from_raw(buffer.width, buffer.height, rgb)
            .unwrap_or_else(|| RgbImage::new(buffer.width, buffer.height))
    }
}
