// SPDX-License-Identifier: GPL-3.0-only

//! Session manifest
//!
//! YAML document stored as `manifest.yaml` in every archive. Key names are
//! part of the on-disk format and must not change.

use crate::backends::camera::{
    Calibration, Extrinsics, Intrinsics, Modality, SessionSnapshot,
};
use crate::config::SaveFormat;
use crate::constants::archive::MANIFEST_VERSION;
use crate::errors::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};

/// Dense matrix block (`rows`, `cols`, element type tag, row-major data)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixBlock {
    pub rows: usize,
    pub cols: usize,
    /// Element type, `d` for double
    pub dt: String,
    pub data: Vec<f64>,
}

impl MatrixBlock {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        Self {
            rows,
            cols,
            dt: "d".to_string(),
            data,
        }
    }

    fn check(&self, name: &str, rows: usize, cols: usize) -> CaptureResult<()> {
        if self.rows != rows || self.cols != cols || self.data.len() != rows * cols {
            return Err(CaptureError::Format(format!(
                "{}: expected {}x{} matrix, got {}x{} with {} values",
                name,
                rows,
                cols,
                self.rows,
                self.cols,
                self.data.len()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicsBlock {
    pub width: u32,
    pub height: u32,
    pub matrix: MatrixBlock,
}

impl From<&Intrinsics> for IntrinsicsBlock {
    fn from(k: &Intrinsics) -> Self {
        Self {
            width: k.width,
            height: k.height,
            matrix: MatrixBlock::new(3, 3, k.matrix().to_vec()),
        }
    }
}

impl IntrinsicsBlock {
    fn to_intrinsics(&self, name: &str) -> CaptureResult<Intrinsics> {
        self.matrix.check(name, 3, 3)?;
        Intrinsics::from_matrix(self.width, self.height, &self.matrix.data)
            .ok_or_else(|| CaptureError::Format(format!("{}: bad camera matrix", name)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtrinsicsBlock {
    pub rotation: MatrixBlock,
    pub translation: MatrixBlock,
}

impl From<&Extrinsics> for ExtrinsicsBlock {
    fn from(e: &Extrinsics) -> Self {
        Self {
            rotation: MatrixBlock::new(3, 3, e.rotation.iter().map(|&v| v as f64).collect()),
            translation: MatrixBlock::new(1, 3, e.translation.iter().map(|&v| v as f64).collect()),
        }
    }
}

impl ExtrinsicsBlock {
    fn to_extrinsics(&self) -> CaptureResult<Extrinsics> {
        self.rotation.check("Extrinsics.rotation", 3, 3)?;
        self.translation.check("Extrinsics.translation", 1, 3)?;
        let mut e = Extrinsics::default();
        for (dst, src) in e.rotation.iter_mut().zip(&self.rotation.data) {
            *dst = *src as f32;
        }
        for (dst, src) in e.translation.iter_mut().zip(&self.translation.data) {
            *dst = *src as f32;
        }
        Ok(e)
    }
}

/// Parsed `manifest.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Frame Number")]
    pub frame_count: usize,
    #[serde(rename = "Data Types")]
    pub data_types: Vec<Modality>,
    #[serde(rename = "Save Format")]
    pub save_format: SaveFormat,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "With Texture", default, skip_serializing_if = "Option::is_none")]
    pub with_texture: Option<bool>,
    #[serde(rename = "Depth resolution")]
    pub depth_resolution: Resolution,
    #[serde(rename = "Depth intrinsics")]
    pub depth_intrinsics: IntrinsicsBlock,
    #[serde(rename = "Depth Scale")]
    pub depth_scale: f64,
    #[serde(rename = "Depth Min")]
    pub depth_min: f64,
    #[serde(rename = "Depth Max")]
    pub depth_max: f64,
    #[serde(rename = "Depth Exposure Time", default)]
    pub depth_exposure_time: f64,
    #[serde(rename = "Depth Gain", default)]
    pub depth_gain: f64,
    #[serde(rename = "RGB resolution", default)]
    pub rgb_resolution: Resolution,
    #[serde(rename = "RGB intrinsics", default, skip_serializing_if = "Option::is_none")]
    pub rgb_intrinsics: Option<IntrinsicsBlock>,
    #[serde(rename = "RGB Exposure Time", default)]
    pub rgb_exposure_time: f64,
    #[serde(rename = "RGB Gain", default)]
    pub rgb_gain: f64,
    #[serde(rename = "Extrinsics", default, skip_serializing_if = "Option::is_none")]
    pub extrinsics: Option<ExtrinsicsBlock>,
}

/// Session facts that are only known once capturing has finished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionTotals {
    pub frame_count: usize,
    pub depth_resolution: Option<(u32, u32)>,
    pub rgb_resolution: Option<(u32, u32)>,
}

impl ArchiveManifest {
    /// Describe a finished session
    pub fn describe(
        name: &str,
        modalities: &[Modality],
        save_format: SaveFormat,
        with_texture: bool,
        snapshot: &SessionSnapshot,
        totals: &SessionTotals,
    ) -> Self {
        let calibration = &snapshot.calibration;
        let k_depth = calibration.depth_intrinsics;
        let k_rgb = calibration.rgb_intrinsics;
        let (dw, dh) = totals
            .depth_resolution
            .unwrap_or((k_depth.width, k_depth.height));
        let (cw, ch) = totals.rgb_resolution.unwrap_or((k_rgb.width, k_rgb.height));

        let mut data_types = modalities.to_vec();
        data_types.sort();
        data_types.dedup();

        Self {
            version: MANIFEST_VERSION.to_string(),
            frame_count: totals.frame_count,
            with_texture: data_types
                .contains(&Modality::PointCloud)
                .then_some(with_texture),
            data_types,
            save_format,
            name: name.to_string(),
            depth_resolution: Resolution {
                width: dw,
                height: dh,
            },
            depth_intrinsics: IntrinsicsBlock::from(&k_depth),
            depth_scale: calibration.depth_scale as f64,
            depth_min: snapshot.depth_range.min_mm as f64,
            depth_max: snapshot.depth_range.max_mm as f64,
            depth_exposure_time: snapshot.depth_exposure.exposure_time,
            depth_gain: snapshot.depth_exposure.gain,
            rgb_resolution: Resolution {
                width: cw,
                height: ch,
            },
            rgb_intrinsics: Some(IntrinsicsBlock::from(&k_rgb)),
            rgb_exposure_time: snapshot.rgb_exposure.exposure_time,
            rgb_gain: snapshot.rgb_exposure.gain,
            extrinsics: Some(ExtrinsicsBlock::from(&calibration.extrinsics)),
        }
    }

    pub fn to_yaml(&self) -> CaptureResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(text: &str) -> CaptureResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn has(&self, modality: Modality) -> bool {
        self.data_types.contains(&modality)
    }

    /// Calibration recorded for the session
    pub fn calibration(&self) -> CaptureResult<Calibration> {
        Ok(Calibration {
            depth_intrinsics: self.depth_intrinsics.to_intrinsics("Depth intrinsics")?,
            rgb_intrinsics: match &self.rgb_intrinsics {
                Some(block) => block.to_intrinsics("RGB intrinsics")?,
                None => Intrinsics::default(),
            },
            extrinsics: match &self.extrinsics {
                Some(block) => block.to_extrinsics()?,
                None => Extrinsics::default(),
            },
            depth_scale: self.depth_scale as f32,
        })
    }
}
