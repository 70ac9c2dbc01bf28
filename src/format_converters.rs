// SPDX-License-Identifier: GPL-3.0-only

//! Per-pixel conversion of delivered frames to RGB
//!
//! The preview samples far fewer pixels than a frame holds, so pixels are
//! converted one at a time at their sample position instead of converting
//! whole frames. Out-of-range reads return black (or the luma value when only
//! chroma is missing) so a short payload never panics.

use crate::capture::DecodedFrame;
use crate::decoder::PixelFormat;
use crate::palette::Palette;

/// Convert YUV (BT.601) to RGB
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
    let g = (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8;
    let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;

    [r, g, b]
}

/// Expand a little-endian RGB565 pixel to 8 bits per channel
pub fn rgb565_to_rgb(lo: u8, hi: u8) -> [u8; 3] {
    let v = u16::from_le_bytes([lo, hi]);
    let r = ((v >> 11) & 0x1f) as u8;
    let g = ((v >> 5) & 0x3f) as u8;
    let b = (v & 0x1f) as u8;
    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]
}

/// RGB value of pixel (x, y); coordinates are clamped to the frame
///
/// `palette` colors 8-bit greyscale frames.
pub fn sample_rgb(frame: &DecodedFrame, x: u32, y: u32, palette: &Palette) -> [u8; 3] {
    if frame.width == 0 || frame.height == 0 {
        return [0, 0, 0];
    }
    let x = x.min(frame.width - 1) as usize;
    let y = y.min(frame.height - 1) as usize;
    let stride = frame.stride as usize;
    let height = frame.height as usize;
    let data = frame.data.as_slice();

    match frame.format {
        PixelFormat::Grey => match data.get(y * stride + x) {
            Some(&v) => palette[v as usize],
            None => [0, 0, 0],
        },
        PixelFormat::Rgb24 => {
            let idx = y * stride + x * 3;
            match data.get(idx..idx + 3) {
                Some(px) => [px[0], px[1], px[2]],
                None => [0, 0, 0],
            }
        }
        // Compressed frames are delivered as RGB24 once decoded
        PixelFormat::Mjpeg | PixelFormat::Jpeg => [0, 0, 0],
        PixelFormat::Bgr24 => {
            let idx = y * stride + x * 3;
            match data.get(idx..idx + 3) {
                Some(px) => [px[2], px[1], px[0]],
                None => [0, 0, 0],
            }
        }
        PixelFormat::Xbgr32 => {
            let idx = y * stride + x * 4;
            match data.get(idx..idx + 3) {
                Some(px) => [px[0], px[1], px[2]],
                None => [0, 0, 0],
            }
        }
        PixelFormat::Rgb565 => {
            let idx = y * stride + x * 2;
            match data.get(idx..idx + 2) {
                Some(px) => rgb565_to_rgb(px[0], px[1]),
                None => [0, 0, 0],
            }
        }
        PixelFormat::Yuyv | PixelFormat::Yvyu | PixelFormat::Uyvy => {
            // Two pixels share one chroma pair
            // YUYV: Y0 U  Y1 V
            // YVYU: Y0 V  Y1 U
            // UYVY: U  Y0 V  Y1
            let base = y * stride + (x & !1) * 2;
            let Some(px) = data.get(base..base + 4) else {
                return [0, 0, 0];
            };
            let odd = x & 1 == 1;
            let (luma, u, v) = match frame.format {
                PixelFormat::Yuyv => (if odd { px[2] } else { px[0] }, px[1], px[3]),
                PixelFormat::Yvyu => (if odd { px[2] } else { px[0] }, px[3], px[1]),
                _ => (if odd { px[3] } else { px[1] }, px[0], px[2]),
            };
            yuv_to_rgb(luma, u, v)
        }
        PixelFormat::Nv12 | PixelFormat::Nv21 => {
            let Some(&luma) = data.get(y * stride + x) else {
                return [0, 0, 0];
            };
            // Interleaved chroma plane after the luma plane, half height
            let uv_idx = stride * height + (y / 2) * stride + (x & !1);
            let Some(uv) = data.get(uv_idx..uv_idx + 2) else {
                return [luma, luma, luma];
            };
            if frame.format == PixelFormat::Nv12 {
                yuv_to_rgb(luma, uv[0], uv[1])
            } else {
                yuv_to_rgb(luma, uv[1], uv[0])
            }
        }
        PixelFormat::Yu12 | PixelFormat::Yv12 => {
            let Some(&luma) = data.get(y * stride + x) else {
                return [0, 0, 0];
            };
            let y_size = stride * height;
            let chroma_stride = stride.div_ceil(2);
            let chroma_size = chroma_stride * height.div_ceil(2);
            let offset = (y / 2) * chroma_stride + x / 2;
            let first = data.get(y_size + offset);
            let second = data.get(y_size + chroma_size + offset);
            match (first, second) {
                (Some(&a), Some(&b)) if frame.format == PixelFormat::Yu12 => {
                    yuv_to_rgb(luma, a, b)
                }
                (Some(&a), Some(&b)) => yuv_to_rgb(luma, b, a),
                _ => [luma, luma, luma],
            }
        }
    }
}
