// SPDX-License-Identifier: GPL-3.0-only

//! Archive playback and frame export

use crate::backends::camera::Modality;
use crate::config::SaveFormat;
use crate::errors::{CaptureError, CaptureResult};
use crate::pipelines::archive::{ArchiveParser, DecodedFrame, frame_file_name};
use crate::pipelines::scene::{CloudFormat, export_point_cloud_las, write_ply_file};
use image::ImageFormat;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info};

/// Playback notifications
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackState {
    Loading,
    Ready { frame_count: usize },
    Error(String),
    Saving,
    SaveResult {
        success: bool,
        message: String,
        files: Vec<PathBuf>,
    },
}

pub struct Playback {
    parser: Option<ArchiveParser>,
    events: UnboundedSender<PlaybackState>,
}

impl Playback {
    pub fn new() -> (Self, UnboundedReceiver<PlaybackState>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                parser: None,
                events,
            },
            receiver,
        )
    }

    fn emit(&self, state: PlaybackState) {
        let _ = self.events.send(state);
    }

    /// Open an archive, replacing the current one
    pub fn load(&mut self, path: impl AsRef<Path>) -> CaptureResult<usize> {
        self.emit(PlaybackState::Loading);
        self.parser = None;
        match ArchiveParser::open(path.as_ref()) {
            Ok(parser) => {
                let frame_count = parser.frame_count();
                self.parser = Some(parser);
                self.emit(PlaybackState::Ready { frame_count });
                Ok(frame_count)
            }
            Err(e) => {
                error!(path = %path.as_ref().display(), error = %e, "Failed to load archive");
                self.emit(PlaybackState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    pub fn parser(&self) -> Option<&ArchiveParser> {
        self.parser.as_ref()
    }

    fn loaded(&self) -> CaptureResult<&ArchiveParser> {
        self.parser
            .as_ref()
            .ok_or_else(|| CaptureError::Data("no archive loaded".to_string()))
    }

    pub fn frame_count(&self) -> usize {
        self.parser.as_ref().map_or(0, |p| p.frame_count())
    }

    /// Decode a frame for display; color follows the depth frame's alignment
    pub fn frame(&self, index: usize, modality: Modality) -> CaptureResult<DecodedFrame> {
        let parser = self.loaded()?;
        let index = match modality {
            Modality::Rgb if parser.manifest().has(Modality::Depth) => parser
                .aligned_color_index(index)
                .ok_or_else(|| CaptureError::Data("archive has no color frames".to_string()))?,
            _ => index,
        };
        parser.decode_frame(index, modality)
    }

    /// Write one frame as standalone PNG images plus a point cloud file
    pub fn export_frame(
        &self,
        index: usize,
        dir: &Path,
        cloud_format: CloudFormat,
    ) -> CaptureResult<Vec<PathBuf>> {
        self.emit(PlaybackState::Saving);
        let result = self.write_frame(index, dir, cloud_format);
        match &result {
            Ok(files) => {
                info!(index, files = files.len(), dir = %dir.display(), "Exported frame");
                self.emit(PlaybackState::SaveResult {
                    success: true,
                    message: format!("Exported {} files for frame {}", files.len(), index),
                    files: files.clone(),
                });
            }
            Err(e) => {
                error!(index, error = %e, "Frame export failed");
                self.emit(PlaybackState::SaveResult {
                    success: false,
                    message: e.to_string(),
                    files: Vec::new(),
                });
            }
        }
        result
    }

    fn write_frame(
        &self,
        index: usize,
        dir: &Path,
        cloud_format: CloudFormat,
    ) -> CaptureResult<Vec<PathBuf>> {
        let parser = self.loaded()?;
        std::fs::create_dir_all(dir).map_err(|e| {
            CaptureError::Resource(format!("cannot create {}: {}", dir.display(), e))
        })?;
        let base = &parser.manifest().name;
        let mut files = Vec::new();

        for &modality in parser.data_types() {
            if modality == Modality::PointCloud {
                continue;
            }
            let path = dir.join(frame_file_name(base, modality, Some(index), SaveFormat::Image));
            match self.frame(index, modality)? {
                DecodedFrame::Depth(img) => img.save_with_format(&path, ImageFormat::Png)?,
                DecodedFrame::Infrared(img) => img.save_with_format(&path, ImageFormat::Png)?,
                DecodedFrame::Color(img) => img.save_with_format(&path, ImageFormat::Png)?,
                DecodedFrame::PointCloud(_) => continue,
            }
            files.push(path);
        }

        if parser.manifest().has(Modality::PointCloud) || parser.manifest().has(Modality::Depth) {
            let DecodedFrame::PointCloud(points) = parser.decode_frame(index, Modality::PointCloud)?
            else {
                return Err(CaptureError::Format("point cloud entry did not decode".to_string()));
            };
            let name = frame_file_name(base, Modality::PointCloud, Some(index), SaveFormat::Image);
            let path = dir.join(name).with_extension(cloud_format.extension());
            match cloud_format {
                CloudFormat::Ply => write_ply_file(&path, &points)?,
                CloudFormat::Las => export_point_cloud_las(&points, &path)?,
            }
            files.push(path);
        }

        Ok(files)
    }
}
