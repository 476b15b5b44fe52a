// SPDX-License-Identifier: GPL-3.0-only

//! Camera collaborator interface
//!
//! The vendor camera layer lives outside this crate. It delivers
//! [`FrameBundle`]s and answers parameter queries; the pipeline only reads
//! those parameters to stamp session manifests and never changes them.
//!
//! ```text
//! ┌─────────────────────┐
//! │   Vendor camera     │  ← streaming thread, SDK handles
//! └──────────┬──────────┘
//!            │ FrameBundle + CameraParameters
//!            ▼
//! ┌─────────────────────┐
//! │ Processors / Engine │
//! └─────────────────────┘
//! ```

pub mod format_converters;
pub mod frame_loop;
pub mod types;

pub use types::*;

/// Read-only camera parameter queries
pub trait CameraParameters: Send + Sync {
    /// Current calibration (intrinsics, extrinsics, depth scale)
    fn calibration(&self) -> Calibration;

    /// Depth display range configured on the camera
    fn depth_range(&self) -> DepthRange;

    /// Exposure state of the sensor behind a stream
    fn exposure(&self, kind: StreamKind) -> SensorExposure;
}

/// Parameters captured once at session start
///
/// Stamped into the archive manifest; immutable for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SessionSnapshot {
    pub calibration: Calibration,
    pub depth_range: DepthRange,
    pub depth_exposure: SensorExposure,
    pub rgb_exposure: SensorExposure,
}

impl SessionSnapshot {
    /// Query every parameter the manifest needs from the camera
    pub fn from_camera(camera: &dyn CameraParameters) -> Self {
        Self {
            calibration: camera.calibration(),
            depth_range: camera.depth_range(),
            depth_exposure: camera.exposure(StreamKind::Depth),
            rgb_exposure: camera.exposure(StreamKind::Color),
        }
    }
}
