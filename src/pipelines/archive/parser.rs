// SPDX-License-Identifier: GPL-3.0-only

//! Read-side access to session archives
//!
//! The parser keeps only the manifest, timestamps and entry list in memory.
//! Every frame request opens the zip again, so one parser can serve several
//! threads without a shared reader.

use super::alignment;
use super::frame_file_name;
use super::manifest::ArchiveManifest;
use super::timestamps::TimestampLists;
use crate::backends::camera::{Calibration, Modality};
use crate::config::{PointCloudConfig, SaveFormat};
use crate::constants::archive::{MANIFEST_FILE, TIMESTAMPS_FILE};
use crate::errors::{CaptureError, CaptureResult};
use crate::pipelines::scene::{PointSet, read_ply_bytes};
use crate::processing::point_cloud::PointCloudProcessor;
use crate::processing::{Depth16Image, DepthBuffer};
use image::{GrayImage, ImageFormat, RgbImage};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// One decoded archive frame
#[derive(Debug, Clone)]
pub enum DecodedFrame {
    Depth(Depth16Image),
    Infrared(GrayImage),
    Color(RgbImage),
    PointCloud(PointSet),
}

impl DecodedFrame {
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            DecodedFrame::Depth(img) => Some(img.dimensions()),
            DecodedFrame::Infrared(img) => Some(img.dimensions()),
            DecodedFrame::Color(img) => Some(img.dimensions()),
            DecodedFrame::PointCloud(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveParser {
    path: PathBuf,
    manifest: ArchiveManifest,
    calibration: Calibration,
    timestamps: TimestampLists,
    timestamps_valid: bool,
    entries: BTreeSet<String>,
}

impl ArchiveParser {
    /// Open an archive and read its manifest and timestamps
    pub fn open(path: impl AsRef<Path>) -> CaptureResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut archive = open_zip(&path)?;
        let entries: BTreeSet<String> = archive.file_names().map(str::to_string).collect();

        if !entries.contains(MANIFEST_FILE) {
            return Err(CaptureError::Format(format!(
                "{} has no {}",
                path.display(),
                MANIFEST_FILE
            )));
        }
        let manifest_text = String::from_utf8(read_entry(&mut archive, MANIFEST_FILE)?)
            .map_err(|e| CaptureError::Format(format!("{}: {}", MANIFEST_FILE, e)))?;
        let manifest = ArchiveManifest::from_yaml(&manifest_text)?;
        let calibration = manifest.calibration()?;

        let timestamps = if entries.contains(TIMESTAMPS_FILE) {
            let text = String::from_utf8(read_entry(&mut archive, TIMESTAMPS_FILE)?)
                .map_err(|e| CaptureError::Format(format!("{}: {}", TIMESTAMPS_FILE, e)))?;
            TimestampLists::parse(&text)?
        } else {
            warn!(path = %path.display(), "Archive has no timestamps, using frame order");
            TimestampLists::default()
        };
        let timestamps_valid = timestamps.is_valid();

        info!(
            path = %path.display(),
            frames = manifest.frame_count,
            data_types = ?manifest.data_types,
            timestamps_valid,
            "Opened archive"
        );

        Ok(Self {
            path,
            manifest,
            calibration,
            timestamps,
            timestamps_valid,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &ArchiveManifest {
        &self.manifest
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn frame_count(&self) -> usize {
        self.manifest.frame_count
    }

    pub fn data_types(&self) -> &[Modality] {
        &self.manifest.data_types
    }

    pub fn save_format(&self) -> SaveFormat {
        self.manifest.save_format
    }

    pub fn timestamps(&self) -> &TimestampLists {
        &self.timestamps
    }

    pub fn is_timestamps_valid(&self) -> bool {
        self.timestamps_valid
    }

    /// Color frame matched to a depth frame, `None` without recorded color
    pub fn aligned_color_index(&self, depth_index: usize) -> Option<usize> {
        if !self.manifest.has(Modality::Rgb) {
            return None;
        }
        if self.timestamps.rgb.is_empty() {
            return Some(depth_index);
        }
        alignment::aligned_color_index(&self.timestamps, depth_index, self.timestamps_valid)
    }

    /// Decode one frame of one modality
    pub fn decode_frame(&self, index: usize, modality: Modality) -> CaptureResult<DecodedFrame> {
        if index >= self.frame_count() {
            return Err(CaptureError::Data(format!(
                "frame {} out of range, archive has {} frames",
                index,
                self.frame_count()
            )));
        }
        if modality == Modality::PointCloud {
            return self.decode_cloud(index);
        }
        if !self.manifest.has(modality) {
            return Err(CaptureError::Data(format!(
                "{} was not recorded in this archive",
                modality
            )));
        }

        let name = self.entry_name(modality, index);
        let bytes = self.read(&name)?;
        match self.save_format() {
            SaveFormat::Image => self.decode_image(&name, modality, &bytes),
            SaveFormat::Raw => self.decode_raw(&name, modality, bytes),
        }
    }

    fn entry_name(&self, modality: Modality, index: usize) -> String {
        frame_file_name(&self.manifest.name, modality, Some(index), self.save_format())
    }

    fn read(&self, name: &str) -> CaptureResult<Vec<u8>> {
        let mut archive = open_zip(&self.path)?;
        read_entry(&mut archive, name)
    }

    fn decode_image(&self, name: &str, modality: Modality, bytes: &[u8]) -> CaptureResult<DecodedFrame> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)
            .map_err(|e| CaptureError::Format(format!("{}: {}", name, e)))?;
        Ok(match modality {
            Modality::Depth => DecodedFrame::Depth(image.into_luma16()),
            Modality::InfraredLeft | Modality::InfraredRight => {
                DecodedFrame::Infrared(image.into_luma8())
            }
            _ => DecodedFrame::Color(image.into_rgb8()),
        })
    }

    fn decode_raw(&self, name: &str, modality: Modality, bytes: Vec<u8>) -> CaptureResult<DecodedFrame> {
        let size_error = |expected: usize, got: usize| {
            CaptureError::Format(format!(
                "{}: expected {} bytes for the recorded resolution, got {}",
                name, expected, got
            ))
        };

        match modality {
            Modality::Depth | Modality::InfraredLeft | Modality::InfraredRight => {
                let res = self.manifest.depth_resolution;
                let pixels = res.width as usize * res.height as usize;
                if modality == Modality::Depth {
                    if bytes.len() != pixels * 2 {
                        return Err(size_error(pixels * 2, bytes.len()));
                    }
                    let units = bytes
                        .chunks_exact(2)
                        .map(|c| u16::from_le_bytes([c[0], c[1]]))
                        .collect();
                    Depth16Image::from_raw(res.width, res.height, units)
                        .map(DecodedFrame::Depth)
                        .ok_or_else(|| size_error(pixels * 2, bytes.len()))
                } else {
                    let len = bytes.len();
                    GrayImage::from_raw(res.width, res.height, bytes)
                        .filter(|img| img.as_raw().len() == pixels)
                        .map(DecodedFrame::Infrared)
                        .ok_or_else(|| size_error(pixels, len))
                }
            }
            _ => {
                let res = self.manifest.rgb_resolution;
                let expected = res.width as usize * res.height as usize * 3;
                if bytes.len() != expected {
                    return Err(size_error(expected, bytes.len()));
                }
                RgbImage::from_raw(res.width, res.height, bytes)
                    .map(DecodedFrame::Color)
                    .ok_or_else(|| size_error(expected, expected))
            }
        }
    }

    /// Stored cloud, or a reconstruction from the stored depth plane
    fn decode_cloud(&self, index: usize) -> CaptureResult<DecodedFrame> {
        let name = self.entry_name(Modality::PointCloud, index);
        if self.entries.contains(&name) {
            let bytes = self.read(&name)?;
            return Ok(DecodedFrame::PointCloud(read_ply_bytes(&bytes)?));
        }

        if !self.manifest.has(Modality::Depth) {
            return Err(CaptureError::Data(format!(
                "frame {} has no point cloud and no depth to rebuild it from",
                index
            )));
        }
        debug!(index, "Rebuilding point cloud from stored depth");
        Ok(DecodedFrame::PointCloud(self.rebuild_cloud(index)?))
    }

    /// Back-project a stored depth frame, textured with its aligned color frame
    pub fn rebuild_cloud(&self, depth_index: usize) -> CaptureResult<PointSet> {
        let DecodedFrame::Depth(depth) = self.decode_frame(depth_index, Modality::Depth)? else {
            return Err(CaptureError::Format("depth entry did not decode to depth".to_string()));
        };
        let (width, height) = depth.dimensions();
        let buffer = DepthBuffer::from_units(width, height, depth.as_raw());

        let texture = self.manifest.with_texture.unwrap_or(true);
        let color = match self.aligned_color_index(depth_index) {
            Some(rgb_index) if texture => match self.decode_color_frame(rgb_index) {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!(rgb_index, error = %e, "Aligned color frame unreadable, cloud left untextured");
                    None
                }
            },
            _ => None,
        };

        let processor = PointCloudProcessor::new(PointCloudConfig {
            texture,
            ..PointCloudConfig::default()
        });
        Ok(processor.process_depth(&buffer, &self.calibration, color.as_ref()))
    }

    fn decode_color_frame(&self, rgb_index: usize) -> CaptureResult<RgbImage> {
        let name = self.entry_name(Modality::Rgb, rgb_index);
        let bytes = self.read(&name)?;
        let frame = match self.save_format() {
            SaveFormat::Image => self.decode_image(&name, Modality::Rgb, &bytes)?,
            SaveFormat::Raw => self.decode_raw(&name, Modality::Rgb, bytes)?,
        };
        match frame {
            DecodedFrame::Color(img) => Ok(img),
            _ => Err(CaptureError::Format(format!("{} is not a color frame", name))),
        }
    }
}

fn open_zip(path: &Path) -> CaptureResult<ZipArchive<BufReader<File>>> {
    let file = File::open(path)
        .map_err(|e| CaptureError::Io(format!("{}: {}", path.display(), e)))?;
    Ok(ZipArchive::new(BufReader::new(file))?)
}

fn read_entry(archive: &mut ZipArchive<BufReader<File>>, name: &str) -> CaptureResult<Vec<u8>> {
    let mut entry = archive.by_name(name).map_err(|e| match e {
        zip::result::ZipError::FileNotFound => {
            CaptureError::Format(format!("archive entry {} missing", name))
        }
        other => other.into(),
    })?;
    // Declared entry sizes are not trusted for the reservation
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::SessionSnapshot;
    use crate::pipelines::archive::{ArchiveWriter, SessionTotals, working_dir};
    use std::io::Write;

    fn write_archive(
        dir: &Path,
        modalities: &[Modality],
        save_format: SaveFormat,
        timestamps: TimestampLists,
        frames: usize,
    ) -> PathBuf {
        let base = "t";
        let work = working_dir(dir, base);
        std::fs::create_dir_all(&work).unwrap();
        for i in 0..frames {
            if modalities.contains(&Modality::Depth) {
                let name = frame_file_name(base, Modality::Depth, Some(i), save_format);
                let img = Depth16Image::from_pixel(4, 2, image::Luma([1000 + i as u16]));
                match save_format {
                    SaveFormat::Image => img.save(work.join(name)).unwrap(),
                    SaveFormat::Raw => {
                        let mut f = File::create(work.join(name)).unwrap();
                        for v in img.as_raw() {
                            f.write_all(&v.to_le_bytes()).unwrap();
                        }
                    }
                }
            }
            if modalities.contains(&Modality::Rgb) {
                let name = frame_file_name(base, Modality::Rgb, Some(i), save_format);
                let img = RgbImage::from_pixel(4, 2, image::Rgb([i as u8 * 10, 0, 0]));
                match save_format {
                    SaveFormat::Image => img.save(work.join(name)).unwrap(),
                    SaveFormat::Raw => std::fs::write(work.join(name), img.as_raw()).unwrap(),
                }
            }
        }

        let mut snapshot = SessionSnapshot::default();
        snapshot.calibration.depth_intrinsics = crate::backends::camera::Intrinsics {
            width: 4,
            height: 2,
            fx: 2.0,
            fy: 2.0,
            cx: 2.0,
            cy: 1.0,
        };
        snapshot.calibration.rgb_intrinsics = snapshot.calibration.depth_intrinsics;
        let manifest = ArchiveManifest::describe(
            base,
            modalities,
            save_format,
            true,
            &snapshot,
            &SessionTotals {
                frame_count: frames,
                depth_resolution: Some((4, 2)),
                rgb_resolution: Some((4, 2)),
            },
        );
        ArchiveWriter::for_session(dir, base)
            .write(&manifest, &timestamps)
            .unwrap()
    }

    #[test]
    fn test_decode_png_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            &[Modality::Depth, Modality::Rgb],
            SaveFormat::Image,
            TimestampLists::default(),
            2,
        );
        let parser = ArchiveParser::open(&path).unwrap();
        assert_eq!(parser.frame_count(), 2);
        assert!(!parser.is_timestamps_valid());

        let DecodedFrame::Depth(depth) = parser.decode_frame(1, Modality::Depth).unwrap() else {
            panic!("expected depth");
        };
        assert_eq!(depth.get_pixel(0, 0)[0], 1001);

        let DecodedFrame::Color(color) = parser.decode_frame(1, Modality::Rgb).unwrap() else {
            panic!("expected color");
        };
        assert_eq!(color.get_pixel(3, 1)[0], 10);
    }

    #[test]
    fn test_decode_raw_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            &[Modality::Depth, Modality::Rgb],
            SaveFormat::Raw,
            TimestampLists::default(),
            1,
        );
        let parser = ArchiveParser::open(&path).unwrap();
        let DecodedFrame::Depth(depth) = parser.decode_frame(0, Modality::Depth).unwrap() else {
            panic!("expected depth");
        };
        assert_eq!(depth.dimensions(), (4, 2));
        assert_eq!(depth.get_pixel(2, 1)[0], 1000);
    }

    #[test]
    fn test_out_of_range_and_unrecorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            &[Modality::Depth],
            SaveFormat::Image,
            TimestampLists::default(),
            1,
        );
        let parser = ArchiveParser::open(&path).unwrap();
        assert!(matches!(
            parser.decode_frame(1, Modality::Depth),
            Err(CaptureError::Data(_))
        ));
        assert!(matches!(
            parser.decode_frame(0, Modality::Rgb),
            Err(CaptureError::Data(_))
        ));
        assert_eq!(parser.aligned_color_index(0), None);
    }

    #[test]
    fn test_point_cloud_rebuilt_from_depth() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            &[Modality::Depth, Modality::Rgb],
            SaveFormat::Image,
            TimestampLists::default(),
            1,
        );
        let parser = ArchiveParser::open(&path).unwrap();
        let DecodedFrame::PointCloud(cloud) = parser.decode_frame(0, Modality::PointCloud).unwrap()
        else {
            panic!("expected cloud");
        };
        assert_eq!(cloud.len(), 8);
        assert!(cloud.colors.is_some());
    }

    #[test]
    fn test_missing_manifest_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.zip");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("readme.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"hello").unwrap();
        zip.finish().unwrap();

        assert!(matches!(
            ArchiveParser::open(&path),
            Err(CaptureError::Format(_))
        ));
        assert!(matches!(
            ArchiveParser::open(dir.path().join("absent.zip")),
            Err(CaptureError::Io(_))
        ));
    }

    #[test]
    fn test_alignment_uses_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let timestamps = TimestampLists {
            depth: vec![100, 200, 300],
            rgb: vec![190, 290, 390],
        };
        let path = write_archive(
            dir.path(),
            &[Modality::Depth, Modality::Rgb],
            SaveFormat::Image,
            timestamps,
            3,
        );
        let parser = ArchiveParser::open(&path).unwrap();
        assert!(parser.is_timestamps_valid());
        assert_eq!(parser.aligned_color_index(0), Some(0));
        assert_eq!(parser.aligned_color_index(1), Some(0));
        assert_eq!(parser.aligned_color_index(2), Some(1));
    }

    /// Rebuild `path` with `name` set to `contents`, keeping every other entry
    fn replace_entry(path: &Path, name: &str, contents: &[u8]) {
        let mut source = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let rebuilt = path.with_extension("tmp");
        let mut zip = zip::ZipWriter::new(File::create(&rebuilt).unwrap());
        for i in 0..source.len() {
            let mut entry = source.by_index(i).unwrap();
            if entry.name() == name {
                continue;
            }
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            zip.start_file(entry.name(), zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(&bytes).unwrap();
        }
        zip.start_file(name, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(contents).unwrap();
        zip.finish().unwrap();
        std::fs::rename(rebuilt, path).unwrap();
    }

    #[test]
    fn test_corrupt_point_cloud_entry_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            &[Modality::Depth],
            SaveFormat::Image,
            TimestampLists::default(),
            1,
        );
        let huge_header = b"ply\nformat binary_little_endian 1.0\n\
            element vertex 18446744073709551615\n\
            property float x\nproperty float y\nproperty float z\nend_header\n";
        replace_entry(&path, "t-0000.ply", huge_header);

        let parser = ArchiveParser::open(&path).unwrap();
        assert!(matches!(
            parser.decode_frame(0, Modality::PointCloud),
            Err(CaptureError::Format(_))
        ));
    }

    #[test]
    fn test_corrupt_timestamps_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            &[Modality::Depth],
            SaveFormat::Image,
            TimestampLists::default(),
            1,
        );
        replace_entry(
            &path,
            TIMESTAMPS_FILE,
            b"[Depth Time Stamps]\n99999999999999999 = 5\n",
        );
        assert!(matches!(
            ArchiveParser::open(&path),
            Err(CaptureError::Format(_))
        ));

        replace_entry(&path, TIMESTAMPS_FILE, b"[Depth Time Stamps]\n0000 = soon\n");
        assert!(matches!(
            ArchiveParser::open(&path),
            Err(CaptureError::Format(_))
        ));
    }

    #[test]
    fn test_truncated_raw_frame_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            &[Modality::Depth, Modality::Rgb],
            SaveFormat::Raw,
            TimestampLists::default(),
            1,
        );
        replace_entry(&path, "t-depth-0000.raw", &[0u8; 3]);
        replace_entry(&path, "t-rgb-0000.raw", &[0u8; 7]);

        let parser = ArchiveParser::open(&path).unwrap();
        assert!(matches!(
            parser.decode_frame(0, Modality::Depth),
            Err(CaptureError::Format(_))
        ));
        assert!(matches!(
            parser.decode_frame(0, Modality::Rgb),
            Err(CaptureError::Format(_))
        ));
    }
}
