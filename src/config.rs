// SPDX-License-Identifier: GPL-3.0-only

//! User configuration
//!
//! Stored as JSON at `<config_dir>/depthcap/config.json`. Every field has a
//! default, so partial or older files load cleanly.

use crate::backends::camera::DepthRange;
use crate::constants::capture::{
    DEFAULT_MAX_CACHED_FRAMES, MAX_SAVE_WORKERS, QUEUE_POLL_INTERVAL, SAVE_WORKERS_PER_CORE,
};
use crate::constants::filters::{DEFAULT_SPATIAL_KERNEL, DEFAULT_TEMPORAL_WINDOW};
use crate::errors::{CaptureError, CaptureResult};
use crate::processing::filters::FilterType;
use crate::processing::visualization::Colormap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Application directory name under the platform config and pictures dirs
pub const APP_DIR: &str = "depthcap";
const CONFIG_FILE: &str = "config.json";

/// How image modalities are written to disk
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum SaveFormat {
    /// PNG images (depth as 16-bit grayscale)
    #[default]
    #[serde(rename = "image")]
    Image,
    /// Raw byte dumps of the decoded planes
    #[serde(rename = "raw")]
    Raw,
}

impl SaveFormat {
    /// File extension used for image modalities
    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Image => "png",
            SaveFormat::Raw => "raw",
        }
    }
}

impl std::fmt::Display for SaveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveFormat::Image => write!(f, "image"),
            SaveFormat::Raw => write!(f, "raw"),
        }
    }
}

/// Depth processing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub hole_fill: bool,
    pub filter: FilterType,
    /// Frames averaged by the temporal filter
    pub temporal_window: usize,
    /// Side length of the spatial filter kernel
    pub spatial_kernel: usize,
    /// Display range override; the camera's range is used when unset
    pub depth_range: Option<DepthRange>,
    pub colormap: Colormap,
    pub quantize: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            hole_fill: true,
            filter: FilterType::None,
            temporal_window: DEFAULT_TEMPORAL_WINDOW,
            spatial_kernel: DEFAULT_SPATIAL_KERNEL,
            depth_range: None,
            colormap: Colormap::default(),
            quantize: false,
        }
    }
}

/// Point cloud generation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointCloudConfig {
    /// Attach per-point color from the color stream
    pub texture: bool,
    /// Estimate per-point normals from the depth grid
    pub normals: bool,
    /// Mirror the cloud horizontally
    pub mirror: bool,
}

impl Default for PointCloudConfig {
    fn default() -> Self {
        Self {
            texture: true,
            normals: false,
            mirror: false,
        }
    }
}

/// Capture engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Bounded queue capacity
    pub max_cached_frames: usize,
    /// Save worker count, 0 picks one from the available parallelism
    pub save_workers: usize,
    /// Default output directory
    pub output_dir: Option<PathBuf>,
    pub save_format: SaveFormat,
    /// Consumer wait on an empty queue, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_cached_frames: DEFAULT_MAX_CACHED_FRAMES,
            save_workers: 0,
            output_dir: None,
            save_format: SaveFormat::default(),
            poll_interval_ms: QUEUE_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl CaptureConfig {
    /// Effective number of save workers
    pub fn worker_count(&self) -> usize {
        if self.save_workers > 0 {
            return self.save_workers;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        (cores * SAVE_WORKERS_PER_CORE).clamp(1, MAX_SAVE_WORKERS)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Output directory, falling back to `~/Pictures/depthcap`
    pub fn resolved_output_dir(&self) -> PathBuf {
        if let Some(dir) = &self.output_dir {
            return dir.clone();
        }
        dirs::picture_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub processing: ProcessingConfig,
    pub point_cloud: PointCloudConfig,
    pub capture: CaptureConfig,
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location, using defaults when no file exists
    pub fn load() -> CaptureResult<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from a specific file, using defaults when it does not exist
    pub fn load_from(path: &Path) -> CaptureResult<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(CaptureError::Config(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| CaptureError::Config(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Store to the default location
    pub fn save(&self) -> CaptureResult<()> {
        let path = Self::default_path()
            .ok_or_else(|| CaptureError::Config("no config directory available".to_string()))?;
        self.save_to(&path)
    }

    /// Store as pretty JSON, creating parent directories
    pub fn save_to(&self, path: &Path) -> CaptureResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CaptureError::Config(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| CaptureError::Config(format!("failed to write {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }
}
