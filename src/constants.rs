// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

use std::time::Duration;

/// Hole-filling limits
pub mod hole_fill {
    /// Components with this many pixels or more are left unfilled
    pub const MAX_COMPONENT_PIXELS: usize = 200;
    /// Maximum spread (depth units) between the neighbours of a fillable hole
    pub const MAX_NEIGHBOR_SPREAD: f32 = 500.0;
    /// Values below this are treated as holes
    pub const HOLE_EPSILON: f32 = 1e-3;
}

/// Depth display defaults (millimetres)
pub mod depth {
    pub const DISPLAY_MIN_MM: f32 = 200.0;
    pub const DISPLAY_MAX_MM: f32 = 5000.0;
    /// Depth scale below this is treated as missing calibration
    pub const MIN_VALID_SCALE: f32 = 1e-6;
    /// Number of quantization bands for colormap banding
    pub const COLORMAP_BANDS: f32 = 32.0;
}

/// Filter defaults
pub mod filters {
    pub const DEFAULT_TEMPORAL_WINDOW: usize = 5;
    pub const MAX_TEMPORAL_WINDOW: usize = 32;
    pub const DEFAULT_SPATIAL_KERNEL: usize = 3;
}

/// Capture engine defaults
pub mod capture {
    use super::Duration;

    /// Default bounded-queue capacity
    pub const DEFAULT_MAX_CACHED_FRAMES: usize = 10;
    /// Consumer wait on an empty queue before re-checking the interruption flag
    pub const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(20);
    /// Save workers per available core (saving is I/O and back-projection bound)
    pub const SAVE_WORKERS_PER_CORE: usize = 2;
    pub const MAX_SAVE_WORKERS: usize = 32;
}

/// On-disk archive layout
pub mod archive {
    pub const MANIFEST_FILE: &str = "manifest.yaml";
    pub const TIMESTAMPS_FILE: &str = "timestamps.txt";
    pub const ARCHIVE_EXTENSION: &str = "zip";
    pub const MANIFEST_VERSION: &str = "1.0.0";
    pub const DEPTH_TIMESTAMPS_HEADER: &str = "[Depth Time Stamps]";
    pub const RGB_TIMESTAMPS_HEADER: &str = "[RGB Time Stamps]";
    /// Zero-padding width of per-frame indices
    pub const INDEX_DIGITS: usize = 4;
    /// Number of leading depth timestamps inspected by the validity check
    pub const TIMESTAMP_SAMPLE_COUNT: usize = 20;
    /// Fraction of zero timestamps at which timestamps are declared invalid
    pub const INVALID_TIMESTAMP_RATIO: f64 = 0.25;
}

/// Base name prefix for sessions without an explicit name
pub const DEFAULT_BASE_NAME_PREFIX: &str = "capture";

/// Application version string
pub fn app_version() -> &'static str {
    env!("GIT_VERSION")
}
