// SPDX-License-Identifier: GPL-3.0-only

//! LAS point cloud export
//!
//! Writes a point set as an uncompressed LAS 1.4 file in metres, with
//! color when the set is textured.

use super::PointSet;
use crate::errors::{CaptureError, CaptureResult};
use las::{Builder, Color, Point, Writer};
use std::path::Path;
use tracing::{debug, info};

/// Export a point set as LAS
pub fn export_point_cloud_las(points: &PointSet, output_path: &Path) -> CaptureResult<()> {
    let Some((min, max)) = points.bounds() else {
        return Err(CaptureError::Data("No valid depth points to export".to_string()));
    };
    let colors = points.colors.as_ref().filter(|c| c.len() == points.len());

    info!(
        point_count = points.len(),
        colored = colors.is_some(),
        path = %output_path.display(),
        "Exporting point cloud"
    );

    // Build LAS header
    let mut builder = Builder::from((1, 4)); // LAS 1.4
    builder.point_format.has_color = colors.is_some();
    builder.point_format.is_compressed = false;

    // 1mm precision, centred on the cloud
    let scale = 0.001;
    let offset = |axis: usize| (min[axis] as f64 + max[axis] as f64) / 2000.0;
    builder.transforms = las::Vector {
        x: las::Transform {
            scale,
            offset: offset(0),
        },
        y: las::Transform {
            scale,
            offset: offset(1),
        },
        z: las::Transform {
            scale,
            offset: offset(2),
        },
    };

    let header = builder.into_header()?;
    let mut writer = Writer::from_path(output_path, header)?;

    for (i, p) in points.positions.iter().enumerate() {
        let mut point = Point {
            x: p[0] as f64 / 1000.0,
            y: p[1] as f64 / 1000.0,
            z: p[2] as f64 / 1000.0,
            ..Default::default()
        };
        if let Some(colors) = colors {
            let [r, g, b] = colors[i];
            point.color = Some(Color::new(r as u16 * 256, g as u16 * 256, b as u16 * 256));
        }
        writer.write_point(point)?;
    }

    writer.close()?;

    debug!(
        path = %output_path.display(),
        "LAS export complete"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = export_point_cloud_las(&PointSet::default(), &dir.path().join("a.las"));
        assert!(matches!(result, Err(CaptureError::Data(_))));
    }

    #[test]
    fn test_colored_export_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.las");
        let points = PointSet {
            positions: vec![[0.0, 0.0, 1000.0], [100.0, -50.0, 1500.0]],
            colors: Some(vec![[255, 0, 0], [0, 255, 0]]),
            ..Default::default()
        };
        export_point_cloud_las(&points, &path).unwrap();
        let size = std::fs::metadata(&path).unwrap().len();
        assert!(size > 375);
    }
}
