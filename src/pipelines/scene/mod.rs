// SPDX-License-Identifier: GPL-3.0-only

//! 3D point sets and their file formats
//!
//! - PLY: archive format, written binary little-endian, read ASCII or binary
//! - LAS: export only

mod las_export;
pub mod ply;

pub use las_export::export_point_cloud_las;
pub use ply::{read_ply, read_ply_bytes, write_ply, write_ply_file};

use serde::{Deserialize, Serialize};

/// Point cloud file format for exports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudFormat {
    #[default]
    Ply,
    Las,
}

impl CloudFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            CloudFormat::Ply => "ply",
            CloudFormat::Las => "las",
        }
    }
}

/// 3D points with optional per-point attributes
///
/// Positions are millimetres. Attribute vectors, when present, have one
/// entry per position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSet {
    pub positions: Vec<[f32; 3]>,
    pub colors: Option<Vec<[u8; 3]>>,
    /// Normalized texture coordinates into the color image
    pub uvs: Option<Vec<[f32; 2]>>,
    pub normals: Option<Vec<[f32; 3]>>,
}

impl PointSet {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Negate X of positions and normals
    pub fn mirror_x(&mut self) {
        for p in &mut self.positions {
            p[0] = -p[0];
        }
        if let Some(normals) = &mut self.normals {
            for n in normals {
                n[0] = -n[0];
            }
        }
    }

    /// Axis-aligned bounds as `(min, max)`
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let first = *self.positions.first()?;
        Some(self.positions.iter().fold((first, first), |(mut lo, mut hi), p| {
            for axis in 0..3 {
                lo[axis] = lo[axis].min(p[axis]);
                hi[axis] = hi[axis].max(p[axis]);
            }
            (lo, hi)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let points = PointSet {
            positions: vec![[1.0, -2.0, 3.0], [-1.0, 5.0, 0.5]],
            ..Default::default()
        };
        assert_eq!(points.bounds(), Some(([-1.0, -2.0, 0.5], [1.0, 5.0, 3.0])));
        assert_eq!(PointSet::default().bounds(), None);
    }

    #[test]
    fn test_mirror_x_flips_normals() {
        let mut points = PointSet {
            positions: vec![[2.0, 1.0, 1.0]],
            normals: Some(vec![[0.5, 0.0, -0.5]]),
            ..Default::default()
        };
        points.mirror_x();
        assert_eq!(points.positions[0], [-2.0, 1.0, 1.0]);
        assert_eq!(points.normals.unwrap()[0], [-0.5, 0.0, -0.5]);
    }
}
