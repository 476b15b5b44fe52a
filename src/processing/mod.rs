// SPDX-License-Identifier: GPL-3.0-only

//! Per-frame processing strategies
//!
//! ```text
//! FrameBundle
//!     │
//!     ├─► DepthProcessor ──► depth image + preview, IR images
//!     │        │ filtered depth
//!     ├─► RgbProcessor ────► color image
//!     │        │ decoded color
//!     └─► PointCloudProcessor ──► point set
//! ```
//!
//! Stages run in that order over a shared [`ProcessingContext`], so the
//! point cloud is built from the filtered depth and the already decoded
//! color image of the same bundle. A stage failure only skips that stage for
//! the current frame.

pub mod depth;
pub mod filters;
pub mod hole_filler;
pub mod point_cloud;
pub mod rgb;
pub mod visualization;

pub use depth::DepthProcessor;
pub use filters::{DepthFilter, FilterType};
pub use hole_filler::{FillStats, HoleFiller};
pub use point_cloud::PointCloudProcessor;
pub use rgb::RgbProcessor;
pub use visualization::Colormap;

use crate::backends::camera::{FrameBundle, Modality};
use crate::config::Config;
use crate::errors::CaptureResult;
use crate::pipelines::scene::PointSet;
use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use tracing::warn;

/// 16-bit single channel image holding raw depth units
pub type Depth16Image = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Single-channel floating point depth buffer in depth units
#[derive(Debug, Clone, PartialEq)]
pub struct DepthBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl DepthBuffer {
    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    /// Wrap an existing row-major buffer
    ///
    /// The length must be `width * height`; shorter buffers are zero padded.
    pub fn from_vec(width: u32, height: u32, mut data: Vec<f32>) -> Self {
        data.resize(width as usize * height as usize, 0.0);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn from_units(width: u32, height: u32, units: &[u16]) -> Self {
        Self::from_vec(width, height, units.iter().map(|&u| u as f32).collect())
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: f32) {
        let i = self.index(x, y);
        self.data[i] = value;
    }

    pub fn row(&self, y: u32) -> &[f32] {
        let start = self.index(0, y);
        &self.data[start..start + self.width as usize]
    }

    /// Round back to 16-bit depth units
    pub fn to_image(&self) -> Depth16Image {
        let units = self
            .data
            .iter()
            .map(|&v| v.round().clamp(0.0, u16::MAX as f32) as u16)
            .collect();
        Depth16Image::from_raw(self.width, self.height, units)
            .unwrap_or_else(|| Depth16Image::new(self.width, self.height))
    }
}

/// Derived artifact of one modality
#[derive(Debug, Clone)]
pub enum ProcessedOutput {
    /// Processed depth plane with its colorized preview
    Depth {
        image: Depth16Image,
        preview: RgbImage,
        /// Back-projected point under the sampled cursor position (mm)
        point: Option<[f32; 3]>,
    },
    Infrared {
        modality: Modality,
        image: GrayImage,
    },
    Color(RgbImage),
    PointCloud(PointSet),
}

impl ProcessedOutput {
    pub fn modality(&self) -> Modality {
        match self {
            ProcessedOutput::Depth { .. } => Modality::Depth,
            ProcessedOutput::Infrared { modality, .. } => *modality,
            ProcessedOutput::Color(_) => Modality::Rgb,
            ProcessedOutput::PointCloud(_) => Modality::PointCloud,
        }
    }
}

/// A bundle together with whatever outputs were already derived from it
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub bundle: FrameBundle,
    pub outputs: Vec<ProcessedOutput>,
}

impl ProcessedFrame {
    /// Frame without precomputed outputs
    pub fn raw(bundle: FrameBundle) -> Self {
        Self {
            bundle,
            outputs: Vec::new(),
        }
    }

    pub fn output(&self, modality: Modality) -> Option<&ProcessedOutput> {
        self.outputs.iter().find(|o| o.modality() == modality)
    }

    pub fn color_image(&self) -> Option<&RgbImage> {
        self.outputs.iter().find_map(|o| match o {
            ProcessedOutput::Color(img) => Some(img),
            _ => None,
        })
    }
}

/// Intermediate results shared between stages of one bundle
#[derive(Debug, Default)]
pub struct ProcessingContext {
    /// Depth after hole filling and filtering
    pub depth: Option<DepthBuffer>,
    /// Decoded color image
    pub color: Option<RgbImage>,
}

/// Processing strategy, dispatched by the stream it consumes
#[derive(Debug)]
pub enum StreamProcessor {
    Depth(DepthProcessor),
    Rgb(RgbProcessor),
    PointCloud(PointCloudProcessor),
}

impl StreamProcessor {
    pub fn name(&self) -> &'static str {
        match self {
            StreamProcessor::Depth(_) => "depth",
            StreamProcessor::Rgb(_) => "rgb",
            StreamProcessor::PointCloud(_) => "point-cloud",
        }
    }

    pub fn process(
        &mut self,
        bundle: &FrameBundle,
        ctx: &mut ProcessingContext,
    ) -> CaptureResult<Vec<ProcessedOutput>> {
        match self {
            StreamProcessor::Depth(p) => {
                let product = p.process_bundle(bundle)?;
                ctx.depth = product.filtered;
                Ok(product.outputs)
            }
            StreamProcessor::Rgb(p) => {
                let Some(sample) = bundle.color() else {
                    return Ok(Vec::new());
                };
                let image = p.process(sample)?;
                ctx.color = Some(image.clone());
                Ok(vec![ProcessedOutput::Color(image)])
            }
            StreamProcessor::PointCloud(p) => {
                if bundle.depth().is_none() {
                    return Ok(Vec::new());
                }
                let points = p.process(bundle, ctx.depth.as_ref(), ctx.color.as_ref())?;
                Ok(vec![ProcessedOutput::PointCloud(points)])
            }
        }
    }
}

/// Callback raised for every freshly produced output
pub type OutputListener = Box<dyn Fn(&ProcessedOutput) + Send>;

/// Runs the processing stages over incoming bundles
pub struct FrameProcessor {
    stages: Vec<StreamProcessor>,
    listeners: Vec<OutputListener>,
}

impl std::fmt::Debug for FrameProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameProcessor")
            .field("stages", &self.stages)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl FrameProcessor {
    /// Depth, color and point cloud stages
    pub fn new(config: &Config) -> Self {
        Self {
            stages: vec![
                StreamProcessor::Depth(DepthProcessor::new(&config.processing)),
                StreamProcessor::Rgb(RgbProcessor),
                StreamProcessor::PointCloud(PointCloudProcessor::new(config.point_cloud)),
            ],
            listeners: Vec::new(),
        }
    }

    /// Only the image stages, no point cloud
    pub fn images_only(config: &Config) -> Self {
        let mut processor = Self::new(config);
        processor
            .stages
            .retain(|s| !matches!(s, StreamProcessor::PointCloud(_)));
        processor
    }

    pub fn update_config(&mut self, config: &Config) {
        for stage in &mut self.stages {
            match stage {
                StreamProcessor::Depth(p) => p.update_config(&config.processing),
                StreamProcessor::PointCloud(p) => p.set_config(config.point_cloud),
                StreamProcessor::Rgb(_) => {}
            }
        }
    }

    pub fn depth_mut(&mut self) -> Option<&mut DepthProcessor> {
        self.stages.iter_mut().find_map(|s| match s {
            StreamProcessor::Depth(p) => Some(p),
            _ => None,
        })
    }

    /// Register an "output updated" listener
    pub fn on_output_updated(&mut self, listener: impl Fn(&ProcessedOutput) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn process(&mut self, bundle: &FrameBundle) -> ProcessedFrame {
        let mut ctx = ProcessingContext::default();
        let mut outputs = Vec::new();

        for stage in &mut self.stages {
            match stage.process(bundle, &mut ctx) {
                Ok(produced) => {
                    for output in &produced {
                        for listener in &self.listeners {
                            listener(output);
                        }
                    }
                    outputs.extend(produced);
                }
                Err(e) => {
                    warn!(stage = stage.name(), error = %e, "Skipping processing stage for frame");
                }
            }
        }

        ProcessedFrame {
            bundle: bundle.clone(),
            outputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::virtual_camera::{SyntheticCamera, VirtualCameraConfig};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_depth_buffer_image_roundtrip() {
        let buf = DepthBuffer::from_vec(2, 1, vec![1000.4, 0.0]);
        let img = buf.to_image();
        assert_eq!(img.get_pixel(0, 0).0, [1000]);
        assert_eq!(img.get_pixel(1, 0).0, [0]);
    }

    #[test]
    fn test_frame_processor_produces_all_outputs() {
        let mut camera = SyntheticCamera::new(VirtualCameraConfig {
            with_ir: true,
            ..Default::default()
        });
        let bundle = camera.next_bundle().unwrap();

        let mut processor = FrameProcessor::new(&Config::default());
        let frame = processor.process(&bundle);

        for modality in Modality::ALL {
            assert!(frame.output(modality).is_some(), "missing {}", modality);
        }
    }

    #[test]
    fn test_output_updated_listener() {
        let mut camera = SyntheticCamera::new(VirtualCameraConfig::default());
        let bundle = camera.next_bundle().unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let mut processor = FrameProcessor::images_only(&Config::default());
        processor.on_output_updated(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        let frame = processor.process(&bundle);
        // Depth and color
        assert_eq!(frame.outputs.len(), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
