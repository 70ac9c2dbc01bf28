// SPDX-License-Identifier: GPL-3.0-only

//! Pixel format mapping and per-frame decode
//!
//! Raw formats the renderer understands are passed through as a borrowed
//! view of the capture buffer. MJPG/JPEG frames are decompressed into a
//! persistent RGB24 scratch buffer sized for the negotiated resolution.

use crate::capture::FrameChannel;
use crate::device::{DeviceFormat, fourcc_name};
use crate::errors::{CaptureError, DecodeError};
use image::ColorType;
use image::ImageDecoder;
use image::codecs::jpeg::JpegDecoder;
use std::io::Cursor;
use tracing::debug;
use v4l::FourCC;

/// Pixel formats the preview can display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 4:2:2, Y0 U Y1 V
    Yuyv,
    /// Packed 4:2:2, Y0 V Y1 U
    Yvyu,
    /// Packed 4:2:2, U Y0 V Y1
    Uyvy,
    /// Planar 4:2:0, Y then U then V (I420)
    Yu12,
    /// Planar 4:2:0, Y then V then U
    Yv12,
    /// Semi-planar 4:2:0, Y then interleaved UV
    Nv12,
    /// Semi-planar 4:2:0, Y then interleaved VU
    Nv21,
    /// 16-bit RGB 5:6:5, little endian
    Rgb565,
    /// 24-bit R G B
    Rgb24,
    /// 24-bit B G R
    Bgr24,
    /// 32-bit XBGR, bytes R G B X in memory
    Xbgr32,
    /// 8-bit greyscale
    Grey,
    /// Motion JPEG
    Mjpeg,
    /// Still JPEG
    Jpeg,
}

impl PixelFormat {
    /// Every supported format, in the order shown to users
    pub const ALL: [PixelFormat; 14] = [
        PixelFormat::Yuyv,
        PixelFormat::Yvyu,
        PixelFormat::Uyvy,
        PixelFormat::Nv12,
        PixelFormat::Nv21,
        PixelFormat::Yu12,
        PixelFormat::Yv12,
        PixelFormat::Rgb565,
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
        PixelFormat::Xbgr32,
        PixelFormat::Mjpeg,
        PixelFormat::Jpeg,
        PixelFormat::Grey,
    ];

    /// V4L2 FourCC code
    pub fn fourcc(self) -> FourCC {
        FourCC::new(self.tag())
    }

    fn tag(self) -> &'static [u8; 4] {
        match self {
            PixelFormat::Yuyv => b"YUYV",
            PixelFormat::Yvyu => b"YVYU",
            PixelFormat::Uyvy => b"UYVY",
            PixelFormat::Yu12 => b"YU12",
            PixelFormat::Yv12 => b"YV12",
            PixelFormat::Nv12 => b"NV12",
            PixelFormat::Nv21 => b"NV21",
            PixelFormat::Rgb565 => b"RGBP",
            PixelFormat::Rgb24 => b"RGB3",
            PixelFormat::Bgr24 => b"BGR3",
            PixelFormat::Xbgr32 => b"RX24",
            PixelFormat::Grey => b"GREY",
            PixelFormat::Mjpeg => b"MJPG",
            PixelFormat::Jpeg => b"JPEG",
        }
    }

    /// FourCC as text, e.g. "YUYV"
    pub fn name(self) -> &'static str {
        std::str::from_utf8(self.tag()).unwrap_or("????")
    }

    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.tag() == &fourcc.repr)
    }

    pub fn is_compressed(self) -> bool {
        matches!(self, PixelFormat::Mjpeg | PixelFormat::Jpeg)
    }

    /// Handoff channel carrying this format
    pub fn channel(self) -> FrameChannel {
        match self {
            PixelFormat::Grey => FrameChannel::Indexed,
            _ => FrameChannel::Direct,
        }
    }

    /// Bytes per pixel of the first plane
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Yuyv | PixelFormat::Yvyu | PixelFormat::Uyvy | PixelFormat::Rgb565 => 2,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 | PixelFormat::Mjpeg | PixelFormat::Jpeg => 3,
            PixelFormat::Xbgr32 => 4,
            PixelFormat::Yu12
            | PixelFormat::Yv12
            | PixelFormat::Nv12
            | PixelFormat::Nv21
            | PixelFormat::Grey => 1,
        }
    }

    /// Whether chroma lives in separate planes after the luma plane
    pub fn is_planar(self) -> bool {
        matches!(
            self,
            PixelFormat::Yu12 | PixelFormat::Yv12 | PixelFormat::Nv12 | PixelFormat::Nv21
        )
    }

    /// Comma-separated FourCC list of every supported format
    pub fn supported_names() -> String {
        Self::ALL.map(PixelFormat::name).join(", ")
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded pixels ready for the renderer
///
/// Borrows either the capture buffer (raw formats) or the decoder's scratch
/// buffer (compressed formats).
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Row stride of the first plane in bytes
    pub stride: u32,
    /// Layout of `data`; RGB24 for decompressed frames
    pub format: PixelFormat,
}

/// Decoder bound to one negotiated format
pub struct PixelFormatDecoder {
    source: PixelFormat,
    width: u32,
    height: u32,
    stride: u32,
    /// RGB24 output for compressed sources, width * height * 3 bytes
    scratch: Vec<u8>,
}

impl PixelFormatDecoder {
    /// Select the decode path for `format`
    ///
    /// An unsupported FourCC is a configuration error listing the
    /// supported set.
    pub fn new(format: &DeviceFormat) -> Result<Self, CaptureError> {
        let source = PixelFormat::from_fourcc(format.fourcc).ok_or_else(|| {
            CaptureError::UnsupportedFormat(format!(
                "{} is not supported, only {} are",
                fourcc_name(format.fourcc),
                PixelFormat::supported_names()
            ))
        })?;

        let (stride, scratch) = if source.is_compressed() {
            let len = format.width as usize * format.height as usize * 3;
            (format.width * 3, vec![0u8; len])
        } else if format.bytes_per_line > 0 {
            (format.bytes_per_line, Vec::new())
        } else {
            (format.width * source.bytes_per_pixel(), Vec::new())
        };

        debug!(
            format = %source,
            width = format.width,
            height = format.height,
            stride,
            compressed = source.is_compressed(),
            "Decoder selected"
        );

        Ok(Self {
            source,
            width: format.width,
            height: format.height,
            stride,
            scratch,
        })
    }

    /// Format of the incoming buffers
    pub fn source_format(&self) -> PixelFormat {
        self.source
    }

    /// Format of the decoded output
    pub fn output_format(&self) -> PixelFormat {
        if self.source.is_compressed() {
            PixelFormat::Rgb24
        } else {
            self.source
        }
    }

    pub fn channel(&self) -> FrameChannel {
        self.source.channel()
    }

    /// Decode one captured payload
    pub fn decode<'a>(&'a mut self, raw: &'a [u8]) -> Result<FrameView<'a>, DecodeError> {
        if raw.is_empty() {
            return Err(DecodeError::Empty);
        }

        if !self.source.is_compressed() {
            return Ok(FrameView {
                data: raw,
                width: self.width,
                height: self.height,
                stride: self.stride,
                format: self.source,
            });
        }

        self.decompress(raw)?;
        Ok(FrameView {
            data: &self.scratch,
            width: self.width,
            height: self.height,
            stride: self.stride,
            format: PixelFormat::Rgb24,
        })
    }

    fn decompress(&mut self, raw: &[u8]) -> Result<(), DecodeError> {
        let decoder =
            JpegDecoder::new(Cursor::new(raw)).map_err(|e| DecodeError::Corrupt(e.to_string()))?;

        let (width, height) = decoder.dimensions();
        if (width, height) != (self.width, self.height) {
            return Err(DecodeError::DimensionMismatch {
                expected: (self.width, self.height),
                actual: (width, height),
            });
        }

        let pixels = width as usize * height as usize;
        match decoder.color_type() {
            ColorType::Rgb8 => decoder
                .read_image(&mut self.scratch[..pixels * 3])
                .map_err(|e| DecodeError::Corrupt(e.to_string())),
            ColorType::L8 => {
                decoder
                    .read_image(&mut self.scratch[..pixels])
                    .map_err(|e| DecodeError::Corrupt(e.to_string()))?;
                expand_luma_in_place(&mut self.scratch, pixels);
                Ok(())
            }
            other => Err(DecodeError::UnsupportedLayout(format!("{:?}", other))),
        }
    }
}

/// Spread `pixels` luma bytes at the start of `buf` to RGB triples
///
/// Walks backwards so no sample is overwritten before it is read.
fn expand_luma_in_place(buf: &mut [u8], pixels: usize) {
    for i in (0..pixels).rev() {
        let y = buf[i];
        buf[i * 3..i * 3 + 3].fill(y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ExtendedColorType;
    use image::codecs::jpeg::JpegEncoder;

    fn format(tag: &[u8; 4], width: u32, height: u32, bytes_per_line: u32) -> DeviceFormat {
        DeviceFormat::new(width, height, FourCC::new(tag), bytes_per_line)
    }

    fn jpeg(width: u32, height: u32, color: ExtendedColorType, fill: u8) -> Vec<u8> {
        let channels = if color == ExtendedColorType::L8 { 1 } else { 3 };
        let pixels = vec![fill; (width * height) as usize * channels];
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .encode(&pixels, width, height, color)
            .unwrap();
        out
    }

    #[test]
    fn test_every_supported_tag_round_trips() {
        for f in PixelFormat::ALL {
            assert_eq!(PixelFormat::from_fourcc(f.fourcc()), Some(f));
        }
        assert_eq!(PixelFormat::Rgb565.name(), "RGBP");
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"H264")), None);
    }

    #[test]
    fn test_unsupported_format_lists_supported_set() {
        let err = PixelFormatDecoder::new(&format(b"H264", 640, 480, 0)).err().unwrap();
        let msg = err.to_string();
        assert!(matches!(err, CaptureError::UnsupportedFormat(_)));
        assert!(msg.contains("H264"));
        assert!(msg.contains("YUYV") && msg.contains("RX24") && msg.contains("GREY"));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_raw_formats_pass_through() {
        let mut decoder = PixelFormatDecoder::new(&format(b"YUYV", 4, 2, 8)).unwrap();
        let raw = [7u8; 16];
        let view = decoder.decode(&raw).unwrap();
        assert_eq!(view.data.as_ptr(), raw.as_ptr());
        assert_eq!(view.stride, 8);
        assert_eq!(view.format, PixelFormat::Yuyv);
    }

    #[test]
    fn test_missing_stride_is_derived() {
        let decoder = PixelFormatDecoder::new(&format(b"RX24", 10, 2, 0)).unwrap();
        assert_eq!(decoder.stride, 40);
    }

    #[test]
    fn test_grey_uses_indexed_channel() {
        let decoder = PixelFormatDecoder::new(&format(b"GREY", 8, 8, 8)).unwrap();
        assert_eq!(decoder.channel(), FrameChannel::Indexed);
        let decoder = PixelFormatDecoder::new(&format(b"NV12", 8, 8, 8)).unwrap();
        assert_eq!(decoder.channel(), FrameChannel::Direct);
    }

    #[test]
    fn test_jpeg_decodes_to_rgb24() {
        let mut decoder = PixelFormatDecoder::new(&format(b"MJPG", 16, 8, 0)).unwrap();
        let data = jpeg(16, 8, ExtendedColorType::Rgb8, 200);
        let view = decoder.decode(&data).unwrap();
        assert_eq!(view.format, PixelFormat::Rgb24);
        assert_eq!(view.stride, 48);
        assert_eq!(view.data.len(), 16 * 8 * 3);
        assert!(view.data.iter().all(|&b| (190..=210).contains(&b)));
    }

    #[test]
    fn test_greyscale_jpeg_is_expanded() {
        let mut decoder = PixelFormatDecoder::new(&format(b"JPEG", 8, 8, 0)).unwrap();
        let data = jpeg(8, 8, ExtendedColorType::L8, 90);
        let view = decoder.decode(&data).unwrap();
        assert_eq!(view.data.len(), 8 * 8 * 3);
        for px in view.data.chunks_exact(3) {
            assert_eq!(px[0], px[1]);
            assert_eq!(px[1], px[2]);
        }
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let mut decoder = PixelFormatDecoder::new(&format(b"MJPG", 640, 480, 0)).unwrap();
        let data = jpeg(32, 16, ExtendedColorType::Rgb8, 10);
        assert_eq!(
            decoder.decode(&data).err(),
            Some(DecodeError::DimensionMismatch {
                expected: (640, 480),
                actual: (32, 16),
            })
        );
    }

    #[test]
    fn test_garbage_is_corrupt_and_decoder_recovers() {
        let mut decoder = PixelFormatDecoder::new(&format(b"MJPG", 8, 8, 0)).unwrap();
        let garbage = vec![0x42u8; 64];
        assert!(matches!(decoder.decode(&garbage), Err(DecodeError::Corrupt(_))));
        assert_eq!(decoder.decode(&[]).err(), Some(DecodeError::Empty));

        let data = jpeg(8, 8, ExtendedColorType::Rgb8, 128);
        assert!(decoder.decode(&data).is_ok());
    }

    #[test]
    fn test_expand_luma_in_place() {
        let mut buf = vec![1, 2, 3, 0, 0, 0, 0, 0, 0];
        expand_luma_in_place(&mut buf, 3);
        assert_eq!(buf, vec![1, 1, 1, 2, 2, 2, 3, 3, 3]);
    }
}
