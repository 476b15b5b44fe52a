// SPDX-License-Identifier: GPL-3.0-only

//! Virtual depth camera producing deterministic synthetic frames
//!
//! Stands in for the vendor camera layer in the CLI and in tests. The depth
//! plane shows a tilted wall with a raised box and a few small interior
//! holes, so hole filling, filtering and back-projection all have something
//! to work on.

use crate::backends::camera::{
    Calibration, CameraParameters, DepthRange, Extrinsics, FrameBundle, Intrinsics, PixelFormat,
    SensorExposure, StreamKind, StreamSample,
};
use crate::errors::CaptureResult;
use std::sync::Arc;

/// Side length of the square holes punched into each synthetic depth frame
const HOLE_SIZE: u32 = 4;

/// Synthetic camera configuration
#[derive(Debug, Clone)]
pub struct VirtualCameraConfig {
    pub depth_width: u32,
    pub depth_height: u32,
    pub rgb_width: u32,
    pub rgb_height: u32,
    /// Interleave left/right IR with the depth plane
    pub with_ir: bool,
    /// Emit a color sample with each bundle
    pub with_color: bool,
    /// Timestamp step between frames (camera clock units, microseconds)
    pub frame_interval: u64,
    /// Color stream clock offset relative to depth
    pub color_offset: i64,
}

impl Default for VirtualCameraConfig {
    fn default() -> Self {
        Self {
            depth_width: 160,
            depth_height: 120,
            rgb_width: 320,
            rgb_height: 240,
            with_ir: false,
            with_color: true,
            frame_interval: 33_333,
            color_offset: 1_200,
        }
    }
}

/// Deterministic frame generator
pub struct SyntheticCamera {
    config: VirtualCameraConfig,
    calibration: Arc<Calibration>,
    frame_number: u64,
}

impl SyntheticCamera {
    pub fn new(config: VirtualCameraConfig) -> Self {
        let depth_intrinsics = Intrinsics {
            width: config.depth_width,
            height: config.depth_height,
            fx: config.depth_width as f32 * 0.9,
            fy: config.depth_width as f32 * 0.9,
            cx: config.depth_width as f32 / 2.0,
            cy: config.depth_height as f32 / 2.0,
        };
        let rgb_intrinsics = Intrinsics {
            width: config.rgb_width,
            height: config.rgb_height,
            fx: config.rgb_width as f32 * 0.9,
            fy: config.rgb_width as f32 * 0.9,
            cx: config.rgb_width as f32 / 2.0,
            cy: config.rgb_height as f32 / 2.0,
        };
        let calibration = Calibration {
            depth_intrinsics,
            rgb_intrinsics,
            extrinsics: Extrinsics {
                translation: [25.0, 0.0, 0.0],
                ..Extrinsics::default()
            },
            depth_scale: 1.0,
        };
        Self {
            config,
            calibration: Arc::new(calibration),
            frame_number: 0,
        }
    }

    pub fn config(&self) -> &VirtualCameraConfig {
        &self.config
    }

    /// Produce the next synchronized bundle
    pub fn next_bundle(&mut self) -> CaptureResult<FrameBundle> {
        let n = self.frame_number;
        self.frame_number += 1;

        let depth_ts = 1_000_000 + n * self.config.frame_interval;
        let mut samples = vec![self.depth_sample(n, depth_ts)?];

        if self.config.with_color {
            let color_ts = depth_ts.saturating_add_signed(self.config.color_offset);
            samples.push(self.color_sample(n, color_ts)?);
        }

        Ok(FrameBundle::new(samples, Arc::clone(&self.calibration)))
    }

    /// Depth value (mm) of the synthetic scene at a pixel
    pub fn scene_depth(&self, x: u32, y: u32, n: u64) -> u16 {
        let w = self.config.depth_width;
        let h = self.config.depth_height;
        // Tilted wall, 1200mm at the top to 1800mm at the bottom
        let mut d = 1200.0 + 600.0 * y as f32 / h.max(1) as f32;
        // Box in the centre, drifting slowly to the right
        let shift = (n % 8) as u32;
        if x > w / 3 + shift && x < w / 2 + shift && y > h / 3 && y < h * 2 / 3 {
            d -= 300.0;
        }
        d as u16
    }

    fn is_hole(&self, x: u32, y: u32) -> bool {
        let w = self.config.depth_width;
        let h = self.config.depth_height;
        // One interior hole per quadrant, clear of the image border
        [(w / 4, h / 4), (w * 3 / 4, h / 4), (w / 4, h * 3 / 4), (w * 3 / 4, h * 3 / 4)]
            .iter()
            .any(|&(hx, hy)| x >= hx && x < hx + HOLE_SIZE && y >= hy && y < hy + HOLE_SIZE)
    }

    fn depth_sample(&self, n: u64, timestamp: u64) -> CaptureResult<StreamSample> {
        let w = self.config.depth_width;
        let h = self.config.depth_height;
        let bytes_per_pixel = if self.config.with_ir { 4 } else { 2 };
        let mut data = Vec::with_capacity((w * h) as usize * bytes_per_pixel);

        for y in 0..h {
            for x in 0..w {
                let d = if self.is_hole(x, y) {
                    0
                } else {
                    self.scene_depth(x, y, n)
                };
                data.extend_from_slice(&d.to_le_bytes());
                if self.config.with_ir {
                    let ir = ((x * 255) / w.max(1)) as u8;
                    data.push(ir);
                    data.push(ir.wrapping_add(8));
                }
            }
        }

        let format = if self.config.with_ir {
            PixelFormat::Z16Ir8x2
        } else {
            PixelFormat::Z16
        };
        StreamSample::new(StreamKind::Depth, format, w, h, timestamp, data)
    }

    fn color_sample(&self, n: u64, timestamp: u64) -> CaptureResult<StreamSample> {
        let w = self.config.rgb_width;
        let h = self.config.rgb_height;
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                data.push(((x * 255) / w.max(1)) as u8);
                data.push(((y * 255) / h.max(1)) as u8);
                data.push((n * 16 % 256) as u8);
            }
        }
        StreamSample::new(StreamKind::Color, PixelFormat::Rgb24, w, h, timestamp, data)
    }
}

impl CameraParameters for SyntheticCamera {
    fn calibration(&self) -> Calibration {
        *self.calibration
    }

    fn depth_range(&self) -> DepthRange {
        DepthRange {
            min_mm: 500.0,
            max_mm: 2500.0,
        }
    }

    fn exposure(&self, kind: StreamKind) -> SensorExposure {
        match kind {
            StreamKind::Color => SensorExposure {
                exposure_time: 10_000.0,
                gain: 16.0,
            },
            _ => SensorExposure {
                exposure_time: 3_000.0,
                gain: 1.0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_has_depth_and_color() {
        let mut camera = SyntheticCamera::new(VirtualCameraConfig::default());
        let bundle = camera.next_bundle().unwrap();
        assert!(bundle.depth().is_some());
        assert!(bundle.color().is_some());
    }

    #[test]
    fn test_timestamps_increase() {
        let mut camera = SyntheticCamera::new(VirtualCameraConfig::default());
        let a = camera.next_bundle().unwrap();
        let b = camera.next_bundle().unwrap();
        assert!(b.depth().unwrap().timestamp() > a.depth().unwrap().timestamp());
    }

    #[test]
    fn test_ir_layout() {
        let mut camera = SyntheticCamera::new(VirtualCameraConfig {
            with_ir: true,
            ..Default::default()
        });
        let bundle = camera.next_bundle().unwrap();
        assert_eq!(bundle.depth().unwrap().format(), PixelFormat::Z16Ir8x2);
    }
}
