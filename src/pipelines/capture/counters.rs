// SPDX-License-Identifier: GPL-3.0-only

//! Session counters and per-stream sequence numbering

use crate::backends::camera::{FrameBundle, Modality, StreamKind};
use crate::pipelines::archive::{SessionTotals, TimestampLists};

/// File indices assigned to one dequeued frame
///
/// `None` means the modality is not saved for this frame. IR planes share
/// the depth index because they come off the same sensor exposure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceIndices {
    pub depth: Option<usize>,
    pub rgb: Option<usize>,
    pub cloud: Option<usize>,
}

impl SequenceIndices {
    pub fn for_modality(&self, modality: Modality) -> Option<usize> {
        match modality {
            Modality::Depth | Modality::InfraredLeft | Modality::InfraredRight => self.depth,
            Modality::Rgb => self.rgb,
            Modality::PointCloud => self.cloud,
        }
    }
}

/// Counters of a running session, guarded by the engine's lock
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureCounters {
    /// Frames admitted into the queue
    pub accepted: usize,
    /// Frames handed to a save task
    pub dispatched: usize,
    /// Frames whose save task finished successfully
    pub captured: usize,
    /// Frames rejected because the queue was full
    pub dropped: usize,
    /// Frames whose save task failed
    pub failed: usize,
    depth_index: usize,
    rgb_index: usize,
    cloud_index: usize,
    pub depth_timestamps: Vec<u64>,
    pub rgb_timestamps: Vec<u64>,
    pub depth_resolution: Option<(u32, u32)>,
    pub rgb_resolution: Option<(u32, u32)>,
}

impl CaptureCounters {
    /// Number the requested modalities of a dequeued frame
    ///
    /// Called in dequeue order, so indices follow arrival order no matter
    /// when the save tasks complete.
    pub fn assign(&mut self, bundle: &FrameBundle, modalities: &[Modality]) -> SequenceIndices {
        let requested = |m: Modality| modalities.contains(&m) && bundle.provides(m);
        let mut indices = SequenceIndices::default();

        let wants_depth = [
            Modality::Depth,
            Modality::InfraredLeft,
            Modality::InfraredRight,
        ]
        .into_iter()
        .any(requested);
        let depth_source = bundle
            .depth()
            .or_else(|| bundle.sample(StreamKind::InfraredLeft))
            .or_else(|| bundle.sample(StreamKind::InfraredRight));
        if wants_depth && let Some(sample) = depth_source {
            indices.depth = Some(self.depth_index);
            self.depth_index += 1;
            self.depth_timestamps.push(sample.timestamp());
            self.depth_resolution
                .get_or_insert((sample.width(), sample.height()));
        }

        if requested(Modality::Rgb)
            && let Some(sample) = bundle.color()
        {
            indices.rgb = Some(self.rgb_index);
            self.rgb_index += 1;
            self.rgb_timestamps.push(sample.timestamp());
            self.rgb_resolution
                .get_or_insert((sample.width(), sample.height()));
        }

        if requested(Modality::PointCloud) {
            indices.cloud = Some(self.cloud_index);
            self.cloud_index += 1;
            if let Some(sample) = bundle.depth() {
                self.depth_resolution
                    .get_or_insert((sample.width(), sample.height()));
            }
        }

        self.dispatched += 1;
        indices
    }

    pub fn timestamps(&self) -> TimestampLists {
        TimestampLists {
            depth: self.depth_timestamps.clone(),
            rgb: self.rgb_timestamps.clone(),
        }
    }

    pub fn totals(&self) -> SessionTotals {
        SessionTotals {
            frame_count: self.dispatched,
            depth_resolution: self.depth_resolution,
            rgb_resolution: self.rgb_resolution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::virtual_camera::{SyntheticCamera, VirtualCameraConfig};

    #[test]
    fn test_indices_follow_dequeue_order() {
        let mut camera = SyntheticCamera::new(VirtualCameraConfig::default());
        let mut counters = CaptureCounters::default();
        let modalities = [Modality::Depth, Modality::Rgb, Modality::PointCloud];

        let mut last = None;
        for expected in 0..4 {
            let bundle = camera.next_bundle().unwrap();
            let indices = counters.assign(&bundle, &modalities);
            assert_eq!(indices.depth, Some(expected));
            assert_eq!(indices.rgb, Some(expected));
            assert_eq!(indices.cloud, Some(expected));
            if let Some(prev) = last {
                assert!(indices.depth > prev);
            }
            last = Some(indices.depth);
        }

        assert_eq!(counters.dispatched, 4);
        assert_eq!(counters.depth_timestamps.len(), 4);
        assert!(counters.depth_timestamps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(counters.depth_resolution, Some((160, 120)));
        assert_eq!(counters.rgb_resolution, Some((320, 240)));
    }

    #[test]
    fn test_unrequested_streams_not_numbered() {
        let mut camera = SyntheticCamera::new(VirtualCameraConfig::default());
        let mut counters = CaptureCounters::default();
        let bundle = camera.next_bundle().unwrap();

        let indices = counters.assign(&bundle, &[Modality::Rgb]);
        assert_eq!(indices.depth, None);
        assert_eq!(indices.rgb, Some(0));
        assert!(counters.depth_timestamps.is_empty());
        assert_eq!(indices.for_modality(Modality::InfraredLeft), None);
    }

    #[test]
    fn test_missing_color_skips_rgb_index() {
        let mut camera = SyntheticCamera::new(VirtualCameraConfig {
            with_color: false,
            ..Default::default()
        });
        let mut counters = CaptureCounters::default();
        let bundle = camera.next_bundle().unwrap();

        let indices = counters.assign(&bundle, &[Modality::Depth, Modality::Rgb]);
        assert_eq!(indices.depth, Some(0));
        assert_eq!(indices.rgb, None);
        assert_eq!(counters.totals().frame_count, 1);
        assert_eq!(counters.totals().rgb_resolution, None);
    }
}
