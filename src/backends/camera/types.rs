// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera frames and calibration

//! Shared types for camera frames

use crate::errors::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Sensor stream a sample was produced by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Depth,
    InfraredLeft,
    InfraredRight,
    Color,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Depth => write!(f, "depth"),
            StreamKind::InfraredLeft => write!(f, "IR-L"),
            StreamKind::InfraredRight => write!(f, "IR-R"),
            StreamKind::Color => write!(f, "RGB"),
        }
    }
}

/// Output modality that can be requested for capture and stored in an archive
///
/// The serialized names are the ones written to the manifest `Data Types` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Modality {
    #[serde(rename = "Depth")]
    Depth,
    #[serde(rename = "IR-L")]
    InfraredLeft,
    #[serde(rename = "IR-R")]
    InfraredRight,
    #[serde(rename = "RGB")]
    Rgb,
    #[serde(rename = "Point Cloud")]
    PointCloud,
}

impl Modality {
    pub const ALL: [Modality; 5] = [
        Modality::Depth,
        Modality::InfraredLeft,
        Modality::InfraredRight,
        Modality::Rgb,
        Modality::PointCloud,
    ];

    /// Tag used in per-frame file names
    pub fn file_tag(&self) -> &'static str {
        match self {
            Modality::Depth => "depth",
            Modality::InfraredLeft => "ir-left",
            Modality::InfraredRight => "ir-right",
            Modality::Rgb => "rgb",
            Modality::PointCloud => "cloud",
        }
    }

    /// Parse a modality from its manifest name or file tag
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.file_tag().eq_ignore_ascii_case(name) || m.display_name() == name)
    }

    /// Name as written in the manifest
    pub fn display_name(&self) -> &'static str {
        match self {
            Modality::Depth => "Depth",
            Modality::InfraredLeft => "IR-L",
            Modality::InfraredRight => "IR-R",
            Modality::Rgb => "RGB",
            Modality::PointCloud => "Point Cloud",
        }
    }

    /// Stream kind carrying this modality's source data, if it is an image modality
    pub fn stream_kind(&self) -> Option<StreamKind> {
        match self {
            Modality::Depth => Some(StreamKind::Depth),
            Modality::InfraredLeft => Some(StreamKind::InfraredLeft),
            Modality::InfraredRight => Some(StreamKind::InfraredRight),
            Modality::Rgb => Some(StreamKind::Color),
            Modality::PointCloud => None,
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Arrangement of the planes inside a depth stream sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthLayout {
    /// Depth plane only
    Depth,
    /// Depth plane with left and right IR interleaved per pixel
    DepthWithIrPair,
    /// Left and right IR interleaved per pixel, no depth plane
    IrPair,
    /// Camera-side X and Z per pixel, bypassing back-projection
    DirectXz,
}

/// Pixel format tag of a stream sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 16-bit little-endian depth units per pixel
    Z16,
    /// 10-bit packed depth, 4 pixels in 5 bytes
    Y10B,
    /// `[depth u16 LE][IR-L u8][IR-R u8]` per pixel
    Z16Ir8x2,
    /// `[IR-L u8][IR-R u8]` per pixel
    Ir8x2,
    /// `[x i16 LE][z u16 LE]` per pixel
    DirectXz,
    /// 8-bit grayscale (IR)
    Gray8,
    /// 10-bit grayscale stored in 16-bit little-endian words (IR)
    Gray16,
    /// Packed RGB, 3 bytes per pixel
    Rgb24,
    /// Packed BGR, 3 bytes per pixel
    Bgr24,
    /// RGBA, 4 bytes per pixel
    Rgba,
    /// Packed YUV 4:2:2 (Y0 U Y1 V)
    Yuyv,
    /// Packed YUV 4:2:2 (U Y0 V Y1)
    Uyvy,
    /// Motion JPEG, variable length
    Mjpeg,
}

impl PixelFormat {
    /// Exact payload length for a `width`×`height` sample, `None` for compressed formats
    pub fn expected_len(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Z16 | PixelFormat::Ir8x2 | PixelFormat::Gray16 => Some(pixels * 2),
            PixelFormat::Y10B => Some(pixels.div_ceil(4) * 5),
            PixelFormat::Z16Ir8x2 | PixelFormat::DirectXz | PixelFormat::Rgba => Some(pixels * 4),
            PixelFormat::Gray8 => Some(pixels),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(pixels * 3),
            PixelFormat::Yuyv | PixelFormat::Uyvy => Some(pixels * 2),
            PixelFormat::Mjpeg => None,
        }
    }

    /// Plane layout when this format is carried on the depth stream
    pub fn depth_layout(&self) -> Option<DepthLayout> {
        match self {
            PixelFormat::Z16 | PixelFormat::Y10B => Some(DepthLayout::Depth),
            PixelFormat::Z16Ir8x2 => Some(DepthLayout::DepthWithIrPair),
            PixelFormat::Ir8x2 => Some(DepthLayout::IrPair),
            PixelFormat::DirectXz => Some(DepthLayout::DirectXz),
            _ => None,
        }
    }

    /// Check if this format is usable on a color stream
    pub fn is_color(&self) -> bool {
        matches!(
            self,
            PixelFormat::Rgb24
                | PixelFormat::Bgr24
                | PixelFormat::Rgba
                | PixelFormat::Yuyv
                | PixelFormat::Uyvy
                | PixelFormat::Mjpeg
                | PixelFormat::Gray8
        )
    }
}

/// One modality's raw payload
///
/// Immutable once produced. The constructor checks the payload length against
/// the pixel format, so processors can rely on the buffer size.
#[derive(Debug, Clone)]
pub struct StreamSample {
    kind: StreamKind,
    format: PixelFormat,
    width: u32,
    height: u32,
    timestamp: u64,
    data: Arc<[u8]>,
}

impl StreamSample {
    pub fn new(
        kind: StreamKind,
        format: PixelFormat,
        width: u32,
        height: u32,
        timestamp: u64,
        data: impl Into<Arc<[u8]>>,
    ) -> CaptureResult<Self> {
        let data = data.into();
        if width == 0 || height == 0 || data.is_empty() {
            return Err(CaptureError::Data(format!(
                "empty {} sample ({}x{}, {} bytes)",
                kind,
                width,
                height,
                data.len()
            )));
        }
        if let Some(expected) = format.expected_len(width, height)
            && data.len() != expected
        {
            return Err(CaptureError::Data(format!(
                "{} sample {:?} {}x{}: expected {} bytes, got {}",
                kind,
                format,
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            kind,
            format,
            width,
            height,
            timestamp,
            data,
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Capture timestamp in the camera clock
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Pinhole intrinsics at a given resolution
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    /// 3x3 camera matrix, row-major
    pub fn matrix(&self) -> [f64; 9] {
        [
            self.fx as f64,
            0.0,
            self.cx as f64,
            0.0,
            self.fy as f64,
            self.cy as f64,
            0.0,
            0.0,
            1.0,
        ]
    }

    /// Build intrinsics from a row-major 3x3 camera matrix
    pub fn from_matrix(width: u32, height: u32, m: &[f64]) -> Option<Self> {
        if m.len() != 9 {
            return None;
        }
        Some(Self {
            width,
            height,
            fx: m[0] as f32,
            fy: m[4] as f32,
            cx: m[2] as f32,
            cy: m[5] as f32,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.fx.abs() > f32::EPSILON && self.fy.abs() > f32::EPSILON
    }

    /// Rescale to another resolution of the same sensor
    pub fn scaled_to(&self, width: u32, height: u32) -> Self {
        if self.width == 0 || self.height == 0 || (self.width == width && self.height == height) {
            return Self {
                width,
                height,
                ..*self
            };
        }
        let sx = width as f32 / self.width as f32;
        let sy = height as f32 / self.height as f32;
        Self {
            width,
            height,
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
        }
    }
}

/// Depth-to-color rigid transform (rotation row-major, translation in millimetres)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrinsics {
    pub rotation: [f32; 9],
    pub translation: [f32; 3],
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self {
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            translation: [0.0; 3],
        }
    }
}

impl Extrinsics {
    /// Map a point from the depth camera frame into the color camera frame
    #[inline]
    pub fn transform(&self, p: [f32; 3]) -> [f32; 3] {
        let r = &self.rotation;
        [
            r[0] * p[0] + r[1] * p[1] + r[2] * p[2] + self.translation[0],
            r[3] * p[0] + r[4] * p[1] + r[5] * p[2] + self.translation[1],
            r[6] * p[0] + r[7] * p[1] + r[8] * p[2] + self.translation[2],
        ]
    }
}

/// Calibration snapshot valid for the frames it is attached to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub depth_intrinsics: Intrinsics,
    pub rgb_intrinsics: Intrinsics,
    pub extrinsics: Extrinsics,
    /// Millimetres per raw depth unit
    pub depth_scale: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            depth_intrinsics: Intrinsics::default(),
            rgb_intrinsics: Intrinsics::default(),
            extrinsics: Extrinsics::default(),
            depth_scale: 1.0,
        }
    }
}

/// Depth display range in millimetres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthRange {
    pub min_mm: f32,
    pub max_mm: f32,
}

impl Default for DepthRange {
    fn default() -> Self {
        Self {
            min_mm: crate::constants::depth::DISPLAY_MIN_MM,
            max_mm: crate::constants::depth::DISPLAY_MAX_MM,
        }
    }
}

/// Exposure state of one sensor as reported by the camera
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorExposure {
    pub exposure_time: f64,
    pub gain: f64,
}

/// Samples captured together plus the calibration valid at capture time
///
/// Created by the camera layer and consumed read-only by the processors.
#[derive(Debug, Clone)]
pub struct FrameBundle {
    samples: Vec<StreamSample>,
    calibration: Arc<Calibration>,
}

impl FrameBundle {
    pub fn new(samples: Vec<StreamSample>, calibration: Arc<Calibration>) -> Self {
        Self {
            samples,
            calibration,
        }
    }

    pub fn samples(&self) -> &[StreamSample] {
        &self.samples
    }

    pub fn sample(&self, kind: StreamKind) -> Option<&StreamSample> {
        self.samples.iter().find(|s| s.kind == kind)
    }

    pub fn depth(&self) -> Option<&StreamSample> {
        self.sample(StreamKind::Depth)
    }

    pub fn color(&self) -> Option<&StreamSample> {
        self.sample(StreamKind::Color)
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn calibration_arc(&self) -> Arc<Calibration> {
        Arc::clone(&self.calibration)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Check whether this bundle carries source data for a modality
    ///
    /// IR modalities may be embedded in a composite depth sample.
    pub fn provides(&self, modality: Modality) -> bool {
        let depth_layout = self.depth().and_then(|d| d.format().depth_layout());
        match modality {
            Modality::Depth => matches!(
                depth_layout,
                Some(DepthLayout::Depth | DepthLayout::DepthWithIrPair)
            ),
            Modality::InfraredLeft | Modality::InfraredRight => {
                modality
                    .stream_kind()
                    .is_some_and(|kind| self.sample(kind).is_some())
                    || matches!(
                        depth_layout,
                        Some(DepthLayout::DepthWithIrPair | DepthLayout::IrPair)
                    )
            }
            Modality::Rgb => self.color().is_some(),
            Modality::PointCloud => matches!(
                depth_layout,
                Some(DepthLayout::Depth | DepthLayout::DepthWithIrPair | DepthLayout::DirectXz)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_length_checked() {
        let err = StreamSample::new(StreamKind::Depth, PixelFormat::Z16, 4, 4, 0, vec![0u8; 31]);
        assert!(matches!(err, Err(CaptureError::Data(_))));

        let ok = StreamSample::new(StreamKind::Depth, PixelFormat::Z16, 4, 4, 7, vec![0u8; 32]);
        assert_eq!(ok.map(|s| s.timestamp()), Ok(7));
    }

    #[test]
    fn test_empty_sample_rejected() {
        let err = StreamSample::new(StreamKind::Color, PixelFormat::Mjpeg, 4, 4, 0, Vec::new());
        assert!(err.is_err());
    }

    #[test]
    fn test_intrinsics_matrix_roundtrip() {
        let k = Intrinsics {
            width: 640,
            height: 480,
            fx: 500.0,
            fy: 501.0,
            cx: 320.0,
            cy: 240.0,
        };
        let back = Intrinsics::from_matrix(640, 480, &k.matrix()).unwrap();
        assert_eq!(back, k);
    }

    #[test]
    fn test_intrinsics_scaling() {
        let k = Intrinsics {
            width: 640,
            height: 480,
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        };
        let half = k.scaled_to(320, 240);
        assert_eq!(half.fx, 250.0);
        assert_eq!(half.cy, 120.0);
    }

    #[test]
    fn test_modality_parse() {
        assert_eq!(Modality::parse("Depth"), Some(Modality::Depth));
        assert_eq!(Modality::parse("ir-left"), Some(Modality::InfraredLeft));
        assert_eq!(Modality::parse("Point Cloud"), Some(Modality::PointCloud));
        assert_eq!(Modality::parse("thermal"), None);
    }

    #[test]
    fn test_bundle_provides_embedded_ir() {
        let depth =
            StreamSample::new(StreamKind::Depth, PixelFormat::Z16Ir8x2, 2, 2, 0, vec![0u8; 16])
                .unwrap();
        let bundle = FrameBundle::new(vec![depth], Arc::new(Calibration::default()));
        assert!(bundle.provides(Modality::Depth));
        assert!(bundle.provides(Modality::InfraredRight));
        assert!(!bundle.provides(Modality::Rgb));
    }
}
