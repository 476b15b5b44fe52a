// SPDX-License-Identifier: GPL-3.0-only

//! Per-frame serialization of captured outputs
//!
//! Each requested modality goes to its own file in the session's working
//! directory. Outputs already derived by the processors are written as they
//! are; anything missing is decoded from the bundle's raw samples.

use super::CaptureSession;
use super::counters::SequenceIndices;
use crate::backends::camera::{Modality, StreamKind};
use crate::config::SaveFormat;
use crate::errors::{CaptureError, CaptureResult};
use crate::pipelines::archive::frame_file_name;
use crate::pipelines::scene::{PointSet, write_ply_file};
use crate::processing::depth::{decode_infrared, demux};
use crate::processing::point_cloud::PointCloudProcessor;
use crate::processing::rgb::decode_color;
use crate::processing::{Depth16Image, DepthBuffer, ProcessedFrame, ProcessedOutput};
use image::{GrayImage, ImageFormat, RgbImage};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Writes the requested modalities of frames into one directory
#[derive(Debug, Clone)]
pub struct OutputSaver {
    session: Arc<CaptureSession>,
    dir: PathBuf,
}

impl OutputSaver {
    pub fn new(session: Arc<CaptureSession>, dir: PathBuf) -> Self {
        Self { session, dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save one frame of a multiple capture
    ///
    /// Returns the written files. Modalities without an assigned index are
    /// skipped.
    pub fn save(
        &self,
        frame: &ProcessedFrame,
        indices: &SequenceIndices,
    ) -> CaptureResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        for &modality in &self.session.modalities {
            let Some(index) = indices.for_modality(modality) else {
                continue;
            };
            if let Some(path) = self.write_modality(frame, modality, Some(index))? {
                written.push(path);
            }
        }
        debug!(files = written.len(), ?indices, "Saved frame");
        Ok(written)
    }

    /// Save a single capture without index suffixes
    pub fn save_single(
        frame: &ProcessedFrame,
        session: &CaptureSession,
        dir: &Path,
    ) -> CaptureResult<Vec<PathBuf>> {
        std::fs::create_dir_all(dir).map_err(|e| {
            CaptureError::Resource(format!("cannot create {}: {}", dir.display(), e))
        })?;
        let saver = Self::new(Arc::new(session.clone()), dir.to_path_buf());
        let mut written = Vec::new();
        for &modality in &session.modalities {
            if !frame.bundle.provides(modality) && frame.output(modality).is_none() {
                debug!(%modality, "Single frame does not carry modality, skipping");
                continue;
            }
            if let Some(path) = saver.write_modality(frame, modality, None)? {
                written.push(path);
            }
        }
        Ok(written)
    }

    fn path_for(&self, modality: Modality, index: Option<usize>) -> PathBuf {
        self.dir.join(frame_file_name(
            &self.session.base_name,
            modality,
            index,
            self.session.save_format,
        ))
    }

    fn write_modality(
        &self,
        frame: &ProcessedFrame,
        modality: Modality,
        index: Option<usize>,
    ) -> CaptureResult<Option<PathBuf>> {
        let path = self.path_for(modality, index);
        let format = self.session.save_format;

        match modality {
            Modality::Depth => {
                let Some(image) = depth_image(frame)? else {
                    return Ok(None);
                };
                match format {
                    SaveFormat::Image => image.save_with_format(&path, ImageFormat::Png)?,
                    SaveFormat::Raw => {
                        let bytes: Vec<u8> =
                            image.as_raw().iter().flat_map(|v| v.to_le_bytes()).collect();
                        write_bytes(&path, &bytes)?;
                    }
                }
            }
            Modality::InfraredLeft | Modality::InfraredRight => {
                let Some(image) = infrared_image(frame, modality)? else {
                    return Ok(None);
                };
                match format {
                    SaveFormat::Image => image.save_with_format(&path, ImageFormat::Png)?,
                    SaveFormat::Raw => write_bytes(&path, image.as_raw())?,
                }
            }
            Modality::Rgb => {
                let Some(image) = color_image(frame)? else {
                    return Ok(None);
                };
                match format {
                    SaveFormat::Image => image.save_with_format(&path, ImageFormat::Png)?,
                    SaveFormat::Raw => write_bytes(&path, image.as_raw())?,
                }
            }
            Modality::PointCloud => {
                let points = self.point_cloud(frame)?;
                write_ply_file(&path, &points)?;
            }
        }
        Ok(Some(path))
    }

    fn point_cloud<'a>(&self, frame: &'a ProcessedFrame) -> CaptureResult<Cow<'a, PointSet>> {
        if let Some(ProcessedOutput::PointCloud(points)) = frame.output(Modality::PointCloud) {
            return Ok(Cow::Borrowed(points));
        }

        let depth = match frame.output(Modality::Depth) {
            Some(ProcessedOutput::Depth { image, .. }) => {
                let (w, h) = image.dimensions();
                Some(DepthBuffer::from_units(w, h, image.as_raw()))
            }
            _ => None,
        };
        let processor = PointCloudProcessor::new(crate::config::PointCloudConfig {
            texture: self.session.with_texture,
            ..self.session.point_cloud
        });
        let points = processor.process(&frame.bundle, depth.as_ref(), frame.color_image())?;
        Ok(Cow::Owned(points))
    }
}

fn write_bytes(path: &Path, bytes: &[u8]) -> CaptureResult<()> {
    std::fs::write(path, bytes).map_err(|e| CaptureError::Io(format!("{}: {}", path.display(), e)))
}

fn depth_image(frame: &ProcessedFrame) -> CaptureResult<Option<Cow<'_, Depth16Image>>> {
    if let Some(ProcessedOutput::Depth { image, .. }) = frame.output(Modality::Depth) {
        return Ok(Some(Cow::Borrowed(image)));
    }
    let Some(sample) = frame.bundle.depth() else {
        return Ok(None);
    };
    let Some(units) = demux(sample)?.depth else {
        return Ok(None);
    };
    Depth16Image::from_raw(sample.width(), sample.height(), units)
        .map(|img| Some(Cow::Owned(img)))
        .ok_or_else(|| CaptureError::Data("depth plane does not fit its sample".to_string()))
}

fn infrared_image(
    frame: &ProcessedFrame,
    modality: Modality,
) -> CaptureResult<Option<Cow<'_, GrayImage>>> {
    let precomputed = frame.outputs.iter().find_map(|o| match o {
        ProcessedOutput::Infrared { modality: m, image } if *m == modality => Some(image),
        _ => None,
    });
    if let Some(image) = precomputed {
        return Ok(Some(Cow::Borrowed(image)));
    }

    let kind = match modality {
        Modality::InfraredLeft => StreamKind::InfraredLeft,
        _ => StreamKind::InfraredRight,
    };
    if let Some(sample) = frame.bundle.sample(kind) {
        return decode_infrared(sample).map(|img| Some(Cow::Owned(img)));
    }

    let Some(sample) = frame.bundle.depth() else {
        return Ok(None);
    };
    if sample.format().depth_layout().is_none() {
        return Ok(None);
    }
    let planes = demux(sample)?;
    let plane = match modality {
        Modality::InfraredLeft => planes.ir_left,
        _ => planes.ir_right,
    };
    let Some(plane) = plane else {
        return Ok(None);
    };
    GrayImage::from_raw(sample.width(), sample.height(), plane)
        .map(|img| Some(Cow::Owned(img)))
        .ok_or_else(|| CaptureError::Data("IR plane does not fit its sample".to_string()))
}

fn color_image(frame: &ProcessedFrame) -> CaptureResult<Option<Cow<'_, RgbImage>>> {
    if let Some(image) = frame.color_image() {
        return Ok(Some(Cow::Borrowed(image)));
    }
    match frame.bundle.color() {
        Some(sample) => decode_color(sample).map(|img| Some(Cow::Owned(img))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::virtual_camera::{SyntheticCamera, VirtualCameraConfig};
    use crate::pipelines::scene::read_ply_bytes;
    use crate::processing::FrameProcessor;

    fn camera() -> SyntheticCamera {
        SyntheticCamera::new(VirtualCameraConfig {
            depth_width: 16,
            depth_height: 12,
            rgb_width: 32,
            rgb_height: 24,
            with_ir: true,
            ..Default::default()
        })
    }

    fn session(dir: &Path, save_format: SaveFormat) -> CaptureSession {
        CaptureSession::new(Modality::ALL.to_vec(), dir.to_path_buf())
            .with_base_name("unit")
            .with_save_format(save_format)
    }

    #[test]
    fn test_save_raw_frame_decodes_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(session(dir.path(), SaveFormat::Raw));
        let saver = OutputSaver::new(Arc::clone(&session), dir.path().to_path_buf());
        let frame = ProcessedFrame::raw(camera().next_bundle().unwrap());
        let indices = SequenceIndices {
            depth: Some(0),
            rgb: Some(0),
            cloud: Some(0),
        };

        let written = saver.save(&frame, &indices).unwrap();
        assert_eq!(written.len(), 5);

        let depth = std::fs::read(dir.path().join("unit-depth-0000.raw")).unwrap();
        assert_eq!(depth.len(), 16 * 12 * 2);
        let ir = std::fs::read(dir.path().join("unit-ir-left-0000.raw")).unwrap();
        assert_eq!(ir.len(), 16 * 12);
        let rgb = std::fs::read(dir.path().join("unit-rgb-0000.raw")).unwrap();
        assert_eq!(rgb.len(), 32 * 24 * 3);

        let cloud = read_ply_bytes(&std::fs::read(dir.path().join("unit-0000.ply")).unwrap()).unwrap();
        assert!(!cloud.is_empty());
        assert!(cloud.colors.is_some());
    }

    #[test]
    fn test_save_processed_frame_as_png() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(session(dir.path(), SaveFormat::Image));
        let saver = OutputSaver::new(Arc::clone(&session), dir.path().to_path_buf());
        let mut processor = FrameProcessor::new(&crate::config::Config::default());
        let frame = processor.process(&camera().next_bundle().unwrap());
        let indices = SequenceIndices {
            depth: Some(3),
            rgb: Some(2),
            cloud: None,
        };

        saver.save(&frame, &indices).unwrap();
        let depth = image::open(dir.path().join("unit-depth-0003.png")).unwrap();
        assert_eq!(depth.color(), image::ColorType::L16);
        assert!(dir.path().join("unit-rgb-0002.png").exists());
        assert!(!dir.path().join("unit-0003.ply").exists());
    }

    #[test]
    fn test_save_single_omits_index() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path(), SaveFormat::Image);
        let frame = ProcessedFrame::raw(camera().next_bundle().unwrap());
        let out = dir.path().join("single");

        let written = OutputSaver::save_single(&frame, &session, &out).unwrap();
        assert_eq!(written.len(), 5);
        assert!(out.join("unit-depth.png").exists());
        assert!(out.join("unit-ir-right.png").exists());
        assert!(out.join("unit.ply").exists());
    }
}
