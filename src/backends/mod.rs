// SPDX-License-Identifier: GPL-3.0-only

//! Frame sources
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          Processors / Capture engine         │
//! └────────────────────┬────────────────────────┘
//!                      │ FrameBundle
//! ┌────────────────────┴────────────────────────┐
//! │  ┌──────────────────┐  ┌────────────────┐   │
//! │  │ Camera interface │  │ Virtual camera │   │
//! │  │ (vendor SDK)     │  │ (synthetic)    │   │
//! │  └──────────────────┘  └────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```

pub mod camera;
pub mod virtual_camera;
