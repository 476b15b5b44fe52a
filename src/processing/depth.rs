// SPDX-License-Identifier: GPL-3.0-only

//! Depth stream processing
//!
//! Demultiplexes the depth stream sample by layout, then runs the depth
//! plane through hole filling, the configured filter and the colorizer.

use super::filters::DepthFilter;
use super::hole_filler::{FillStats, HoleFiller};
use super::point_cloud::{back_project, depth_intrinsics};
use super::visualization::Colorize;
use super::{DepthBuffer, ProcessedOutput};
use crate::backends::camera::format_converters::{
    ir_10bit_to_gray, split_depth_ir_pair, split_ir_pair, unpack_direct_xz, unpack_y10b,
    unpack_z16,
};
use crate::backends::camera::{
    Calibration, DepthLayout, DepthRange, FrameBundle, Modality, PixelFormat, StreamKind,
    StreamSample,
};
use crate::config::ProcessingConfig;
use crate::constants::depth::MIN_VALID_SCALE;
use crate::constants::hole_fill::HOLE_EPSILON;
use crate::errors::{CaptureError, CaptureResult};
use image::GrayImage;
use tracing::{debug, warn};

/// Planes extracted from one depth stream sample
#[derive(Debug, Clone, Default)]
pub struct DepthPlanes {
    /// Depth units, row-major
    pub depth: Option<Vec<u16>>,
    pub ir_left: Option<Vec<u8>>,
    pub ir_right: Option<Vec<u8>>,
}

/// Split a depth stream sample into its planes
pub fn demux(sample: &StreamSample) -> CaptureResult<DepthPlanes> {
    let layout = sample.format().depth_layout().ok_or_else(|| {
        CaptureError::Data(format!(
            "unsupported depth stream layout {:?}",
            sample.format()
        ))
    })?;
    let data = sample.data();

    let planes = match layout {
        DepthLayout::Depth => {
            let depth = match sample.format() {
                PixelFormat::Y10B => unpack_y10b(data, sample.width(), sample.height()),
                _ => unpack_z16(data),
            };
            DepthPlanes {
                depth: Some(depth),
                ..Default::default()
            }
        }
        DepthLayout::DepthWithIrPair => {
            let (depth, left, right) = split_depth_ir_pair(data);
            DepthPlanes {
                depth: Some(depth),
                ir_left: Some(left),
                ir_right: Some(right),
            }
        }
        DepthLayout::IrPair => {
            let (left, right) = split_ir_pair(data);
            DepthPlanes {
                depth: None,
                ir_left: Some(left),
                ir_right: Some(right),
            }
        }
        DepthLayout::DirectXz => DepthPlanes {
            depth: Some(unpack_direct_xz(data).into_iter().map(|(_, z)| z).collect()),
            ..Default::default()
        },
    };
    Ok(planes)
}

/// Decode a standalone IR stream sample
pub fn decode_infrared(sample: &StreamSample) -> CaptureResult<GrayImage> {
    let gray = match sample.format() {
        PixelFormat::Gray8 => sample.data().to_vec(),
        PixelFormat::Gray16 => ir_10bit_to_gray(sample.data()),
        other => {
            return Err(CaptureError::Data(format!(
                "unsupported IR format {:?}",
                other
            )));
        }
    };
    gray_image(sample.width(), sample.height(), gray)
}

fn gray_image(width: u32, height: u32, data: Vec<u8>) -> CaptureResult<GrayImage> {
    GrayImage::from_raw(width, height, data)
        .ok_or_else(|| CaptureError::Data(format!("IR plane does not fit {}x{}", width, height)))
}

/// Depth scale in mm per unit, falling back to 1.0 on missing calibration
pub fn effective_depth_scale(calibration: &Calibration) -> f32 {
    if calibration.depth_scale.abs() < MIN_VALID_SCALE {
        1.0
    } else {
        calibration.depth_scale
    }
}

/// Depth processing results for one bundle
#[derive(Debug, Default)]
pub struct DepthProduct {
    /// Depth after hole filling and filtering
    pub filtered: Option<DepthBuffer>,
    pub outputs: Vec<ProcessedOutput>,
    pub fill_stats: Option<FillStats>,
}

#[derive(Debug)]
pub struct DepthProcessor {
    hole_fill: bool,
    hole_filler: HoleFiller,
    filter: DepthFilter,
    config_range: Option<DepthRange>,
    camera_range: DepthRange,
    colorize: Colorize,
    point_sample: Option<(f32, f32)>,
    scale_warned: bool,
}

impl DepthProcessor {
    pub fn new(config: &ProcessingConfig) -> Self {
        let mut processor = Self {
            hole_fill: config.hole_fill,
            hole_filler: HoleFiller::default(),
            filter: DepthFilter::new(config.filter, config.spatial_kernel, config.temporal_window),
            config_range: config.depth_range,
            camera_range: DepthRange::default(),
            colorize: Colorize {
                range: DepthRange::default(),
                depth_scale: 1.0,
                colormap: config.colormap,
                quantize: config.quantize,
            },
            point_sample: None,
            scale_warned: false,
        };
        processor.colorize.range = processor.display_range();
        processor
    }

    pub fn update_config(&mut self, config: &ProcessingConfig) {
        self.hole_fill = config.hole_fill;
        self.filter.set_filter_type(config.filter);
        self.filter.set_kernel_size(config.spatial_kernel);
        self.filter.set_temporal_window(config.temporal_window);
        self.config_range = config.depth_range;
        self.colorize.colormap = config.colormap;
        self.colorize.quantize = config.quantize;
        self.colorize.range = self.display_range();
    }

    /// Display range reported by the camera, used unless configured explicitly
    pub fn set_camera_range(&mut self, range: DepthRange) {
        self.camera_range = range;
        self.colorize.range = self.display_range();
    }

    pub fn display_range(&self) -> DepthRange {
        self.config_range.unwrap_or(self.camera_range)
    }

    /// Enable point-sample mode at a normalized (0..1) image position
    pub fn set_point_sample(&mut self, position: Option<(f32, f32)>) {
        self.point_sample = position;
    }

    pub fn filter(&self) -> &DepthFilter {
        &self.filter
    }

    /// Process the depth sample and any standalone IR samples of a bundle
    pub fn process_bundle(&mut self, bundle: &FrameBundle) -> CaptureResult<DepthProduct> {
        let mut product = match bundle.depth() {
            Some(sample) => self.process(sample, bundle.calibration())?,
            None => DepthProduct::default(),
        };

        for (kind, modality) in [
            (StreamKind::InfraredLeft, Modality::InfraredLeft),
            (StreamKind::InfraredRight, Modality::InfraredRight),
        ] {
            if product.outputs.iter().any(|o| o.modality() == modality) {
                continue;
            }
            if let Some(sample) = bundle.sample(kind) {
                match decode_infrared(sample) {
                    Ok(image) => product
                        .outputs
                        .push(ProcessedOutput::Infrared { modality, image }),
                    Err(e) => warn!(stream = %kind, error = %e, "Skipping IR sample"),
                }
            }
        }

        Ok(product)
    }

    /// Process one depth stream sample
    pub fn process(
        &mut self,
        sample: &StreamSample,
        calibration: &Calibration,
    ) -> CaptureResult<DepthProduct> {
        let planes = demux(sample)?;
        let (width, height) = (sample.width(), sample.height());
        let mut product = DepthProduct::default();

        if let Some(units) = planes.depth {
            let scale = self.checked_scale(calibration);
            self.colorize.depth_scale = scale;

            let mut buffer = DepthBuffer::from_units(width, height, &units);
            if self.hole_fill {
                product.fill_stats = Some(self.hole_filler.fill(&mut buffer));
            }
            let buffer = self.filter.apply(buffer);

            let point = self.point_sample.and_then(|(nx, ny)| {
                sample_point(&buffer, calibration, scale, nx, ny)
            });

            product.outputs.push(ProcessedOutput::Depth {
                image: buffer.to_image(),
                preview: self.colorize.render(&buffer),
                point,
            });
            product.filtered = Some(buffer);
        }

        if let Some(left) = planes.ir_left {
            product.outputs.push(ProcessedOutput::Infrared {
                modality: Modality::InfraredLeft,
                image: gray_image(width, height, left)?,
            });
        }
        if let Some(right) = planes.ir_right {
            product.outputs.push(ProcessedOutput::Infrared {
                modality: Modality::InfraredRight,
                image: gray_image(width, height, right)?,
            });
        }

        Ok(product)
    }

    fn checked_scale(&mut self, calibration: &Calibration) -> f32 {
        if calibration.depth_scale.abs() < MIN_VALID_SCALE {
            if !self.scale_warned {
                warn!(
                    depth_scale = calibration.depth_scale,
                    "Invalid configuration: depth scale missing, assuming 1 mm per unit"
                );
                self.scale_warned = true;
            }
        } else {
            self.scale_warned = false;
        }
        effective_depth_scale(calibration)
    }
}

/// Back-project the depth pixel under a normalized image position
pub fn sample_point(
    buffer: &DepthBuffer,
    calibration: &Calibration,
    scale: f32,
    nx: f32,
    ny: f32,
) -> Option<[f32; 3]> {
    if buffer.width == 0 || buffer.height == 0 {
        return None;
    }
    let u = (nx.clamp(0.0, 1.0) * (buffer.width - 1) as f32).round() as u32;
    let v = (ny.clamp(0.0, 1.0) * (buffer.height - 1) as f32).round() as u32;
    let d = buffer.get(u, v);
    if d < HOLE_EPSILON {
        debug!(u, v, "No depth under sampled point");
        return None;
    }
    let intrinsics = depth_intrinsics(calibration, buffer.width, buffer.height);
    Some(back_project(&intrinsics, u as f32, v as f32, d * scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::Intrinsics;
    use crate::processing::filters::FilterType;

    fn calibration(w: u32, h: u32) -> Calibration {
        Calibration {
            depth_intrinsics: Intrinsics {
                width: w,
                height: h,
                fx: 100.0,
                fy: 100.0,
                cx: (w / 2) as f32,
                cy: (h / 2) as f32,
            },
            ..Default::default()
        }
    }

    fn z16_sample(w: u32, h: u32, values: &[u16]) -> StreamSample {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        StreamSample::new(StreamKind::Depth, PixelFormat::Z16, w, h, 0, data).unwrap()
    }

    #[test]
    fn test_plain_depth_fills_interior_hole() {
        let mut values = vec![1000u16; 25];
        values[12] = 0;
        let sample = z16_sample(5, 5, &values);

        let mut processor = DepthProcessor::new(&ProcessingConfig::default());
        let product = processor.process(&sample, &calibration(5, 5)).unwrap();

        let filtered = product.filtered.unwrap();
        assert_eq!(filtered.get(2, 2), 1000.0);
        assert_eq!(product.fill_stats.map(|s| s.filled), Some(1));
        assert_eq!(product.outputs.len(), 1);
    }

    #[test]
    fn test_hole_fill_disabled() {
        let mut values = vec![1000u16; 25];
        values[12] = 0;
        let sample = z16_sample(5, 5, &values);

        let config = ProcessingConfig {
            hole_fill: false,
            ..Default::default()
        };
        let mut processor = DepthProcessor::new(&config);
        let product = processor.process(&sample, &calibration(5, 5)).unwrap();
        assert_eq!(product.filtered.unwrap().get(2, 2), 0.0);
    }

    #[test]
    fn test_ir_pair_produces_only_ir() {
        let data = vec![7u8, 9, 7, 9, 7, 9, 7, 9];
        let sample =
            StreamSample::new(StreamKind::Depth, PixelFormat::Ir8x2, 2, 2, 0, data).unwrap();
        let mut processor = DepthProcessor::new(&ProcessingConfig::default());
        let product = processor.process(&sample, &calibration(2, 2)).unwrap();

        assert!(product.filtered.is_none());
        let modalities: Vec<_> = product.outputs.iter().map(|o| o.modality()).collect();
        assert_eq!(
            modalities,
            vec![Modality::InfraredLeft, Modality::InfraredRight]
        );
    }

    #[test]
    fn test_depth_with_ir_pair() {
        let mut data = Vec::new();
        for _ in 0..4 {
            data.extend_from_slice(&1500u16.to_le_bytes());
            data.extend_from_slice(&[10, 20]);
        }
        let sample =
            StreamSample::new(StreamKind::Depth, PixelFormat::Z16Ir8x2, 2, 2, 0, data).unwrap();
        let mut processor = DepthProcessor::new(&ProcessingConfig::default());
        let product = processor.process(&sample, &calibration(2, 2)).unwrap();
        assert_eq!(product.outputs.len(), 3);
        match &product.outputs[2] {
            ProcessedOutput::Infrared { image, .. } => assert_eq!(image.get_pixel(0, 0).0, [20]),
            other => panic!("unexpected output {:?}", other.modality()),
        }
    }

    #[test]
    fn test_color_stream_on_depth_is_rejected() {
        let sample =
            StreamSample::new(StreamKind::Depth, PixelFormat::Rgb24, 1, 1, 0, vec![0u8; 3])
                .unwrap();
        let mut processor = DepthProcessor::new(&ProcessingConfig::default());
        let result = processor.process(&sample, &calibration(1, 1));
        assert!(matches!(result, Err(CaptureError::Data(_))));
    }

    #[test]
    fn test_missing_scale_degrades() {
        let sample = z16_sample(2, 2, &[1000; 4]);
        let calib = Calibration {
            depth_scale: 0.0,
            ..calibration(2, 2)
        };
        let mut processor = DepthProcessor::new(&ProcessingConfig::default());
        let product = processor.process(&sample, &calib).unwrap();
        assert_eq!(product.outputs.len(), 1);
    }

    #[test]
    fn test_point_sample_back_projects_center() {
        let sample = z16_sample(5, 5, &[2000; 25]);
        let mut processor = DepthProcessor::new(&ProcessingConfig::default());
        processor.set_point_sample(Some((0.5, 0.5)));
        let product = processor.process(&sample, &calibration(5, 5)).unwrap();
        match &product.outputs[0] {
            ProcessedOutput::Depth { point, .. } => assert_eq!(*point, Some([0.0, 0.0, 2000.0])),
            other => panic!("unexpected output {:?}", other.modality()),
        }
    }

    #[test]
    fn test_leaving_temporal_mode_resets_filter() {
        let config = ProcessingConfig {
            filter: FilterType::Temporal,
            ..Default::default()
        };
        let mut processor = DepthProcessor::new(&config);
        let sample = z16_sample(2, 2, &[1000; 4]);
        processor.process(&sample, &calibration(2, 2)).unwrap();
        assert_eq!(processor.filter().cached_frames(), 1);

        processor.update_config(&ProcessingConfig::default());
        assert_eq!(processor.filter().cached_frames(), 0);
    }
}
