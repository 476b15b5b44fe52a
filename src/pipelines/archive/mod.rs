// SPDX-License-Identifier: GPL-3.0-only

//! Session archives
//!
//! A session is first written into a working directory, then packed into a
//! Deflate-compressed zip next to it:
//!
//! ```text
//! <output>/<base>.zip
//! ├── manifest.yaml
//! ├── timestamps.txt
//! ├── <base>-depth-0000.png
//! ├── <base>-rgb-0000.png
//! ├── <base>-0000.ply
//! └── ...
//! ```

pub mod alignment;
pub mod manifest;
pub mod parser;
pub mod timestamps;

pub use alignment::{aligned_color_index, alignment_table, nearest_timestamp};
pub use manifest::{ArchiveManifest, SessionTotals};
pub use parser::{ArchiveParser, DecodedFrame};
pub use timestamps::{TimestampLists, timestamps_valid};

use crate::backends::camera::Modality;
use crate::config::SaveFormat;
use crate::constants::DEFAULT_BASE_NAME_PREFIX;
use crate::constants::archive::{ARCHIVE_EXTENSION, INDEX_DIGITS, MANIFEST_FILE, TIMESTAMPS_FILE};
use crate::errors::{CaptureError, CaptureResult};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// Session base name from the current local time
pub fn default_base_name() -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    format!("{}_{}", DEFAULT_BASE_NAME_PREFIX, timestamp)
}

/// Name of a per-frame artifact file
///
/// Image modalities are `<base>-<tag>-<NNNN>.<ext>`, point clouds
/// `<base>-<NNNN>.ply`. Without an index (single capture) the index part is
/// left out.
pub fn frame_file_name(
    base: &str,
    modality: Modality,
    index: Option<usize>,
    save_format: SaveFormat,
) -> String {
    match (modality, index) {
        (Modality::PointCloud, Some(i)) => format!("{}-{:0width$}.ply", base, i, width = INDEX_DIGITS),
        (Modality::PointCloud, None) => format!("{}.ply", base),
        (m, Some(i)) => format!(
            "{}-{}-{:0width$}.{}",
            base,
            m.file_tag(),
            i,
            save_format.extension(),
            width = INDEX_DIGITS
        ),
        (m, None) => format!("{}-{}.{}", base, m.file_tag(), save_format.extension()),
    }
}

/// Working directory of a session
pub fn working_dir(output_dir: &Path, base: &str) -> PathBuf {
    output_dir.join(base)
}

/// Final archive path of a session
pub fn archive_path(output_dir: &Path, base: &str) -> PathBuf {
    output_dir.join(format!("{}.{}", base, ARCHIVE_EXTENSION))
}

/// Assembles the archive of a finished session
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    working_dir: PathBuf,
    archive_path: PathBuf,
}

impl ArchiveWriter {
    pub fn new(working_dir: PathBuf, archive_path: PathBuf) -> Self {
        Self {
            working_dir,
            archive_path,
        }
    }

    pub fn for_session(output_dir: &Path, base: &str) -> Self {
        Self::new(working_dir(output_dir, base), archive_path(output_dir, base))
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Write timestamps and manifest, compress, remove the working directory
    pub fn write(
        &self,
        manifest: &ArchiveManifest,
        timestamps: &TimestampLists,
    ) -> CaptureResult<PathBuf> {
        if !self.working_dir.is_dir() {
            return Err(CaptureError::Resource(format!(
                "working directory {} does not exist",
                self.working_dir.display()
            )));
        }

        std::fs::write(self.working_dir.join(TIMESTAMPS_FILE), timestamps.to_text())?;
        std::fs::write(self.working_dir.join(MANIFEST_FILE), manifest.to_yaml()?)?;
        debug!(dir = %self.working_dir.display(), "Wrote manifest and timestamps");

        let entries = self.compress()?;

        if let Err(e) = std::fs::remove_dir_all(&self.working_dir) {
            warn!(
                dir = %self.working_dir.display(),
                error = %e,
                "Failed to remove working directory"
            );
        }

        info!(
            path = %self.archive_path.display(),
            entries,
            frames = manifest.frame_count,
            "Archive written"
        );
        Ok(self.archive_path.clone())
    }

    fn compress(&self) -> CaptureResult<usize> {
        let mut names: Vec<PathBuf> = std::fs::read_dir(&self.working_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        names.sort();

        let file = File::create(&self.archive_path).map_err(|e| {
            CaptureError::Io(format!("{}: {}", self.archive_path.display(), e))
        })?;
        let mut zip = zip::ZipWriter::new(BufWriter::new(file));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for path in &names {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!(path = %path.display(), "Skipping non UTF-8 file name");
                continue;
            };
            zip.start_file(name, options)?;
            let mut src = File::open(path)?;
            std::io::copy(&mut src, &mut zip)?;
        }

        zip.finish()?;
        Ok(names.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_file_names() {
        assert_eq!(
            frame_file_name("s", Modality::Depth, Some(7), SaveFormat::Image),
            "s-depth-0007.png"
        );
        assert_eq!(
            frame_file_name("s", Modality::InfraredRight, Some(12), SaveFormat::Raw),
            "s-ir-right-0012.raw"
        );
        assert_eq!(
            frame_file_name("s", Modality::PointCloud, Some(3), SaveFormat::Raw),
            "s-0003.ply"
        );
        assert_eq!(
            frame_file_name("s", Modality::Rgb, None, SaveFormat::Image),
            "s-rgb.png"
        );
        assert_eq!(
            frame_file_name("s", Modality::PointCloud, None, SaveFormat::Image),
            "s.ply"
        );
    }

    #[test]
    fn test_default_base_name() {
        let name = default_base_name();
        assert!(name.starts_with("capture_"));
        assert_eq!(name.len(), "capture_YYYYmmdd_HHMMSS".len());
    }

    #[test]
    fn test_missing_working_dir_is_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArchiveWriter::for_session(dir.path(), "nothing");
        let manifest = ArchiveManifest::from_yaml(
            "Version: 1.0.0\nFrame Number: 0\nData Types: []\nSave Format: image\nName: x\n\
             Depth resolution: {width: 0, height: 0}\n\
             Depth intrinsics: {width: 0, height: 0, matrix: {rows: 3, cols: 3, dt: d, data: [0,0,0,0,0,0,0,0,1]}}\n\
             Depth Scale: 1.0\nDepth Min: 0\nDepth Max: 0\n",
        )
        .unwrap();
        let result = writer.write(&manifest, &TimestampLists::default());
        assert!(matches!(result, Err(CaptureError::Resource(_))));
    }
}
