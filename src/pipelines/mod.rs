// SPDX-License-Identifier: GPL-3.0-only

//! Capture, archive and playback pipelines
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ FrameBundle  │ ──▶ │  Capture engine   │ ──▶ │  <base>.zip  │
//! │ (processed)  │     │  - bounded queue  │     │  manifest    │
//! │              │     │  - save workers   │     │  timestamps  │
//! └──────────────┘     └───────────────────┘     └──────┬───────┘
//!                                                       │
//! ┌──────────────┐     ┌───────────────────┐            │
//! │ Decoded frame│ ◀── │  Archive parser   │ ◀──────────┘
//! │ / export     │     │  - alignment      │
//! └──────────────┘     └───────────────────┘
//! ```
//!
//! - [`capture`]: Single and multiple capture engine
//! - [`archive`]: Archive layout, writer and parser
//! - [`playback`]: Playback state and frame export
//! - [`scene`]: Point sets and their file formats

pub mod archive;
pub mod capture;
pub mod playback;
pub mod scene;
