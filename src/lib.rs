// SPDX-License-Identifier: GPL-3.0-only

//! depthcap - capture and archive pipeline for depth cameras
//!
//! Turns multi-modal depth camera frames (depth, stereo IR, RGB) into depth
//! images, colorized previews and point clouds, records sessions into
//! self-describing archives and reads them back for playback.
//!
//! # Architecture
//!
//! - [`backends`]: Camera collaborator interface and the virtual camera
//! - [`processing`]: Hole filling, filters, depth/RGB/point cloud processors
//! - [`pipelines`]: Capture engine, archive writer/parser, playback
//! - [`config`]: User configuration handling
//! - [`errors`]: Crate error type

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod pipelines;
pub mod processing;

// Re-export commonly used types
pub use backends::camera::{FrameBundle, Modality, SessionSnapshot, StreamSample};
pub use config::{Config, SaveFormat};
pub use errors::{CaptureError, CaptureResult};
pub use pipelines::archive::{ArchiveParser, DecodedFrame};
pub use pipelines::capture::{CaptureEngine, CaptureEvent, CaptureSession, CaptureType};
pub use processing::FrameProcessor;
