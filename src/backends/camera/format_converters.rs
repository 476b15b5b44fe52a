// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion utilities for raw stream samples
//!
//! Demultiplexes composite depth payloads and converts color/IR payloads
//! into plain 8-bit buffers for the processors.

/// Decode little-endian 16-bit depth units
pub fn unpack_z16(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Unpack Y10B (10-bit packed) depth data to 16-bit values
///
/// Y10B packs 4 10-bit values into 5 bytes:
/// ```text
/// [A9:A2][B9:B2][C9:C2][D9:D2][D1:D0,C1:C0,B1:B0,A1:A0]
/// ```
///
/// Returns raw 10-bit values (0-1023 range).
pub fn unpack_y10b(data: &[u8], width: u32, height: u32) -> Vec<u16> {
    let pixel_count = (width * height) as usize;
    let mut output = Vec::with_capacity(pixel_count);

    for chunk in data.chunks_exact(5) {
        let low = chunk[4] as u16;
        for (i, &high) in chunk[..4].iter().enumerate() {
            if output.len() >= pixel_count {
                break;
            }
            output.push(((high as u16) << 2) | ((low >> (i * 2)) & 0x03));
        }
    }

    output
}

/// Split a `[depth u16 LE][IR-L u8][IR-R u8]` interleaved payload into planes
pub fn split_depth_ir_pair(data: &[u8]) -> (Vec<u16>, Vec<u8>, Vec<u8>) {
    let pixels = data.len() / 4;
    let mut depth = Vec::with_capacity(pixels);
    let mut left = Vec::with_capacity(pixels);
    let mut right = Vec::with_capacity(pixels);

    for px in data.chunks_exact(4) {
        depth.push(u16::from_le_bytes([px[0], px[1]]));
        left.push(px[2]);
        right.push(px[3]);
    }

    (depth, left, right)
}

/// Split an `[IR-L u8][IR-R u8]` interleaved payload into planes
pub fn split_ir_pair(data: &[u8]) -> (Vec<u8>, Vec<u8>) {
    data.chunks_exact(2).map(|px| (px[0], px[1])).unzip()
}

/// Decode a direct-XZ payload into `(x, z)` pairs in depth units
pub fn unpack_direct_xz(data: &[u8]) -> Vec<(i16, u16)> {
    data.chunks_exact(4)
        .map(|px| {
            (
                i16::from_le_bytes([px[0], px[1]]),
                u16::from_le_bytes([px[2], px[3]]),
            )
        })
        .collect()
}

#[inline]
fn yuv_to_rgb(y: f32, u: f32, v: f32) -> [u8; 3] {
    // BT.601
    [
        (y + 1.402 * v).clamp(0.0, 255.0) as u8,
        (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8,
        (y + 1.772 * u).clamp(0.0, 255.0) as u8,
    ]
}

/// Convert UYVY (YUV 4:2:2) to RGB
///
/// UYVY format: U0 Y0 V0 Y1 - each 4-byte group encodes 2 pixels.
pub fn uyvy_to_rgb(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let pixel_count = (width * height) as usize;
    let mut rgb = Vec::with_capacity(pixel_count * 3);

    for chunk in data.chunks_exact(4) {
        let u = chunk[0] as f32 - 128.0;
        let v = chunk[2] as f32 - 128.0;
        for y in [chunk[1], chunk[3]] {
            rgb.extend_from_slice(&yuv_to_rgb(y as f32, u, v));
        }
    }

    rgb.truncate(pixel_count * 3);
    rgb
}

/// Convert YUYV (YUV 4:2:2) to RGB
///
/// YUYV format: Y0 U0 Y1 V0 - each 4-byte group encodes 2 pixels.
pub fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let pixel_count = (width * height) as usize;
    let mut rgb = Vec::with_capacity(pixel_count * 3);

    for chunk in data.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            rgb.extend_from_slice(&yuv_to_rgb(y as f32, u, v));
        }
    }

    rgb.truncate(pixel_count * 3);
    rgb
}

/// Swap BGR byte order to RGB
pub fn bgr_to_rgb(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(3)
        .flat_map(|c| [c[2], c[1], c[0]])
        .collect()
}

/// Drop the alpha channel of RGBA data
pub fn rgba_to_rgb(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(4).flat_map(|c| [c[0], c[1], c[2]]).collect()
}

/// Expand 8-bit grayscale to RGB triplets
pub fn gray_to_rgb(data: &[u8]) -> Vec<u8> {
    data.iter().flat_map(|&g| [g, g, g]).collect()
}

/// Convert IR 10-bit data (u16 little-endian words) to 8-bit grayscale
pub fn ir_10bit_to_gray(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(2)
        .map(|c| {
            let val = u16::from_le_bytes([c[0], c[1]]);
            (val.min(1023) >> 2) as u8
        })
        .collect()
}
