// SPDX-License-Identifier: GPL-3.0-only

//! Depth back-projection into 3D point sets
//!
//! Points are in millimetres in the depth camera frame (x right, y down,
//! z forward). Texturing maps each point through the extrinsics into the
//! color camera and samples the decoded color image there.

use super::DepthBuffer;
use super::depth::{demux, effective_depth_scale};
use super::rgb::decode_color;
use crate::backends::camera::format_converters::unpack_direct_xz;
use crate::backends::camera::{Calibration, DepthLayout, FrameBundle, Intrinsics};
use crate::config::PointCloudConfig;
use crate::constants::hole_fill::HOLE_EPSILON;
use crate::errors::{CaptureError, CaptureResult};
use crate::pipelines::scene::PointSet;
use image::RgbImage;
use tracing::{debug, warn};

/// Back-project pixel `(u, v)` at depth `z_mm`
#[inline]
pub fn back_project(intrinsics: &Intrinsics, u: f32, v: f32, z_mm: f32) -> [f32; 3] {
    [
        (u - intrinsics.cx) * z_mm / intrinsics.fx,
        (v - intrinsics.cy) * z_mm / intrinsics.fy,
        z_mm,
    ]
}

/// Depth intrinsics at the given resolution
///
/// Falls back to a 90° horizontal field of view centred on the image when
/// the calibration carries no usable intrinsics.
pub fn depth_intrinsics(calibration: &Calibration, width: u32, height: u32) -> Intrinsics {
    let k = calibration.depth_intrinsics;
    if k.is_valid() {
        k.scaled_to(width, height)
    } else {
        fallback_intrinsics(width, height)
    }
}

fn fallback_intrinsics(width: u32, height: u32) -> Intrinsics {
    let f = width.max(1) as f32 / 2.0;
    Intrinsics {
        width,
        height,
        fx: f,
        fy: f,
        cx: width as f32 / 2.0,
        cy: height as f32 / 2.0,
    }
}

#[inline]
fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Points laid out on the depth pixel grid
struct GridCloud {
    width: u32,
    height: u32,
    /// Point index of every pixel, `None` for holes
    index: Vec<Option<usize>>,
    positions: Vec<[f32; 3]>,
}

impl GridCloud {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            index: vec![None; width as usize * height as usize],
            positions: Vec::new(),
        }
    }

    fn push(&mut self, u: u32, v: u32, p: [f32; 3]) {
        let i = v as usize * self.width as usize + u as usize;
        self.index[i] = Some(self.positions.len());
        self.positions.push(p);
    }

    fn at(&self, u: i64, v: i64) -> Option<[f32; 3]> {
        if u < 0 || v < 0 || u >= self.width as i64 || v >= self.height as i64 {
            return None;
        }
        self.index[v as usize * self.width as usize + u as usize].map(|i| self.positions[i])
    }

    /// Central-difference normals, oriented towards the camera
    fn normals(&self) -> Vec<[f32; 3]> {
        let mut normals = vec![[0.0f32; 3]; self.positions.len()];
        for v in 0..self.height as i64 {
            for u in 0..self.width as i64 {
                let Some(center) = self.at(u, v) else {
                    continue;
                };
                let i = self.index[v as usize * self.width as usize + u as usize];
                let Some(i) = i else { continue };

                let right = self.at(u + 1, v).unwrap_or(center);
                let left = self.at(u - 1, v).unwrap_or(center);
                let down = self.at(u, v + 1).unwrap_or(center);
                let up = self.at(u, v - 1).unwrap_or(center);

                let n = cross(sub(right, left), sub(down, up));
                let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
                if len <= f32::EPSILON {
                    continue;
                }
                let mut n = [n[0] / len, n[1] / len, n[2] / len];
                if n[0] * center[0] + n[1] * center[1] + n[2] * center[2] > 0.0 {
                    n = [-n[0], -n[1], -n[2]];
                }
                normals[i] = n;
            }
        }
        normals
    }
}

#[derive(Debug, Clone)]
pub struct PointCloudProcessor {
    config: PointCloudConfig,
}

impl PointCloudProcessor {
    pub fn new(config: PointCloudConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> PointCloudConfig {
        self.config
    }

    pub fn set_config(&mut self, config: PointCloudConfig) {
        self.config = config;
    }

    /// Build the point set of a bundle
    ///
    /// `depth` is the already filtered depth plane when available, otherwise
    /// the raw plane is decoded from the bundle. `color` is the decoded color
    /// image; without one the color sample is decoded on demand.
    pub fn process(
        &self,
        bundle: &FrameBundle,
        depth: Option<&DepthBuffer>,
        color: Option<&RgbImage>,
    ) -> CaptureResult<PointSet> {
        let sample = bundle
            .depth()
            .ok_or_else(|| CaptureError::Data("bundle has no depth sample".to_string()))?;
        let calibration = bundle.calibration();
        let scale = effective_depth_scale(calibration);
        let (width, height) = (sample.width(), sample.height());
        let intrinsics = depth_intrinsics(calibration, width, height);

        let grid = match sample.format().depth_layout() {
            Some(DepthLayout::Depth | DepthLayout::DepthWithIrPair) => match depth {
                Some(buffer) if buffer.width == width && buffer.height == height => {
                    back_project_buffer(buffer, &intrinsics, scale)
                }
                _ => {
                    let units = demux(sample)?.depth.unwrap_or_default();
                    let buffer = DepthBuffer::from_units(width, height, &units);
                    back_project_buffer(&buffer, &intrinsics, scale)
                }
            },
            Some(DepthLayout::DirectXz) => {
                direct_xz(&unpack_direct_xz(sample.data()), width, height, &intrinsics, scale)
            }
            layout => {
                warn!(
                    format = ?sample.format(),
                    ?layout,
                    "Unsupported stream layout for point cloud, skipping frame"
                );
                return Err(CaptureError::Data(format!(
                    "no point cloud for {:?} depth stream",
                    sample.format()
                )));
            }
        };

        let color = match color {
            Some(image) => Some(std::borrow::Cow::Borrowed(image)),
            None if self.config.texture => match bundle.color().map(decode_color) {
                Some(Ok(image)) => Some(std::borrow::Cow::Owned(image)),
                Some(Err(e)) => {
                    warn!(error = %e, "Color decode failed, point cloud left untextured");
                    None
                }
                None => {
                    debug!("No color sample, point cloud left untextured");
                    None
                }
            },
            None => None,
        };

        Ok(self.finish(grid, calibration, color.as_deref()))
    }

    /// Build the point set of a stored depth plane
    pub fn process_depth(
        &self,
        buffer: &DepthBuffer,
        calibration: &Calibration,
        color: Option<&RgbImage>,
    ) -> PointSet {
        let scale = effective_depth_scale(calibration);
        let intrinsics = depth_intrinsics(calibration, buffer.width, buffer.height);
        let grid = back_project_buffer(buffer, &intrinsics, scale);
        self.finish(grid, calibration, color)
    }

    fn finish(
        &self,
        grid: GridCloud,
        calibration: &Calibration,
        color: Option<&RgbImage>,
    ) -> PointSet {
        let (width, height) = (grid.width, grid.height);
        let mut points = PointSet {
            normals: self.config.normals.then(|| grid.normals()),
            positions: grid.positions,
            ..Default::default()
        };

        if self.config.texture
            && let Some(image) = color
        {
            apply_texture(&mut points, image, calibration, width, height);
        }

        if self.config.mirror {
            points.mirror_x();
        }

        points
    }
}

fn back_project_buffer(buffer: &DepthBuffer, intrinsics: &Intrinsics, scale: f32) -> GridCloud {
    let mut grid = GridCloud::new(buffer.width, buffer.height);
    for v in 0..buffer.height {
        for u in 0..buffer.width {
            let d = buffer.get(u, v);
            if d < HOLE_EPSILON {
                continue;
            }
            grid.push(u, v, back_project(intrinsics, u as f32, v as f32, d * scale));
        }
    }
    grid
}

/// Points from a direct XZ stream; Y comes from the row through the intrinsics
fn direct_xz(
    xz: &[(i16, u16)],
    width: u32,
    height: u32,
    intrinsics: &Intrinsics,
    scale: f32,
) -> GridCloud {
    let mut grid = GridCloud::new(width, height);
    for (i, &(x, z)) in xz.iter().enumerate() {
        if z == 0 {
            continue;
        }
        let u = (i % width as usize) as u32;
        let v = (i / width as usize) as u32;
        if v >= height {
            break;
        }
        let z_mm = z as f32 * scale;
        let y_mm = (v as f32 - intrinsics.cy) * z_mm / intrinsics.fy;
        grid.push(u, v, [x as f32 * scale, y_mm, z_mm]);
    }
    grid
}

/// Project every point into the color image and record its color and UV
fn apply_texture(
    points: &mut PointSet,
    image: &RgbImage,
    calibration: &Calibration,
    depth_width: u32,
    depth_height: u32,
) {
    let (w, h) = image.dimensions();
    let rgb_k = calibration.rgb_intrinsics;
    let mut colors = Vec::with_capacity(points.positions.len());
    let mut uvs = Vec::with_capacity(points.positions.len());

    if rgb_k.is_valid() {
        let k = rgb_k.scaled_to(w, h);
        for &p in &points.positions {
            let q = calibration.extrinsics.transform(p);
            if q[2] <= f32::EPSILON {
                colors.push([0, 0, 0]);
                uvs.push([-1.0, -1.0]);
                continue;
            }
            let u = k.fx * q[0] / q[2] + k.cx;
            let v = k.fy * q[1] / q[2] + k.cy;
            uvs.push([u / w as f32, v / h as f32]);
            colors.push(sample_color(image, u, v));
        }
    } else {
        // No color calibration: map by proportional pixel position
        let depth_k = depth_intrinsics(calibration, depth_width, depth_height);
        for &p in &points.positions {
            let du = depth_k.fx * p[0] / p[2] + depth_k.cx;
            let dv = depth_k.fy * p[1] / p[2] + depth_k.cy;
            let u = du * w as f32 / depth_width.max(1) as f32;
            let v = dv * h as f32 / depth_height.max(1) as f32;
            uvs.push([u / w as f32, v / h as f32]);
            colors.push(sample_color(image, u, v));
        }
    }

    points.colors = Some(colors);
    points.uvs = Some(uvs);
}

#[inline]
fn sample_color(image: &RgbImage, u: f32, v: f32) -> [u8; 3] {
    if u < 0.0 || v < 0.0 {
        return [0, 0, 0];
    }
    let (x, y) = (u as u32, v as u32);
    if x >= image.width() || y >= image.height() {
        return [0, 0, 0];
    }
    image.get_pixel(x, y).0
}
