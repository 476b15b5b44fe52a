// SPDX-License-Identifier: GPL-3.0-only

//! Color stream decoding

use crate::backends::camera::format_converters::{
    bgr_to_rgb, gray_to_rgb, rgba_to_rgb, uyvy_to_rgb, yuyv_to_rgb,
};
use crate::backends::camera::{PixelFormat, StreamSample};
use crate::errors::{CaptureError, CaptureResult};
use image::{ImageFormat, RgbImage};

/// Decodes color samples into display images
#[derive(Debug, Clone, Copy, Default)]
pub struct RgbProcessor;

impl RgbProcessor {
    pub fn process(&self, sample: &StreamSample) -> CaptureResult<RgbImage> {
        decode_color(sample)
    }
}

/// Decode a color stream sample to packed RGB
pub fn decode_color(sample: &StreamSample) -> CaptureResult<RgbImage> {
    let (w, h) = (sample.width(), sample.height());
    let data = sample.data();

    let rgb = match sample.format() {
        PixelFormat::Rgb24 => data.to_vec(),
        PixelFormat::Bgr24 => bgr_to_rgb(data),
        PixelFormat::Rgba => rgba_to_rgb(data),
        PixelFormat::Yuyv => yuyv_to_rgb(data, w, h),
        PixelFormat::Uyvy => uyvy_to_rgb(data, w, h),
        PixelFormat::Gray8 => gray_to_rgb(data),
        PixelFormat::Mjpeg => {
            let decoded = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_rgb8();
            if decoded.dimensions() != (w, h) {
                return Err(CaptureError::Data(format!(
                    "MJPEG frame is {}x{}, stream announced {}x{}",
                    decoded.width(),
                    decoded.height(),
                    w,
                    h
                )));
            }
            return Ok(decoded);
        }
        other => {
            return Err(CaptureError::Data(format!(
                "unsupported color format {:?}",
                other
            )));
        }
    };

    RgbImage::from_raw(w, h, rgb)
        .ok_or_else(|| CaptureError::Data(format!("color plane does not fit {}x{}", w, h)))
}
