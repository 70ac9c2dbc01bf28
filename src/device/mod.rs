// SPDX-License-Identifier: GPL-3.0-only

//! Video device abstraction
//!
//! The capture engine talks to the kernel through the [`VideoDevice`] trait,
//! which mirrors the streaming I/O ioctls one to one. Two implementations
//! exist:
//!
//! - [`V4l2Device`]: a real `/dev/videoN` node using memory-mapped buffers
//! - [`VirtualDevice`]: a scripted in-memory device for engine tests; the
//!   binary always opens a real node

pub mod v4l2;
pub mod virtual_device;

pub use v4l2::V4l2Device;
pub use virtual_device::{CallLog, DeviceCall, VirtualDevice, VirtualFrame};

use std::io;
use std::time::Duration;
use v4l::FourCC;

/// Capabilities reported by the driver
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Driver name (e.g. "uvcvideo")
    pub driver: String,
    /// Card name
    pub card: String,
    /// Bus information
    pub bus_info: String,
    /// Device supports single-planar video capture
    pub video_capture: bool,
    /// Device supports streaming I/O
    pub streaming: bool,
}

/// Negotiated capture format
///
/// Read once at startup and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    /// Row stride of the first plane in bytes
    pub bytes_per_line: u32,
}

impl DeviceFormat {
    pub fn new(width: u32, height: u32, fourcc: FourCC, bytes_per_line: u32) -> Self {
        Self {
            width,
            height,
            fourcc,
            bytes_per_line,
        }
    }

    /// FourCC as printable text, e.g. "YUYV"
    pub fn fourcc_name(&self) -> String {
        fourcc_name(self.fourcc)
    }
}

impl std::fmt::Display for DeviceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.fourcc_name())
    }
}

/// Render a FourCC as text, replacing non-printable bytes
pub fn fourcc_name(fourcc: FourCC) -> String {
    fourcc
        .repr
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect()
}

/// Metadata of a buffer returned by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: u32,
    pub bytes_used: u32,
    /// Capture timestamp as reported by the driver
    pub timestamp: Duration,
    /// Driver frame sequence number
    pub sequence: u32,
}

/// Memory region shared with the driver for one buffer
///
/// Implementations release the mapping when dropped.
pub trait BufferMemory: Send {
    /// The whole mapped region
    fn as_slice(&self) -> &[u8];

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Streaming I/O operations of a video capture device
///
/// All methods map onto a single driver request. Buffer indices are the
/// driver's indices; ownership bookkeeping is the caller's job
/// (see [`crate::capture::BufferRing`]).
pub trait VideoDevice: Send {
    /// Path or name used in log messages
    fn name(&self) -> &str;

    fn query_capabilities(&self) -> io::Result<DeviceCapabilities>;

    fn get_format(&self) -> io::Result<DeviceFormat>;

    /// Apply `format`. Returns the format the driver actually set, which may
    /// differ (e.g. a padded `bytes_per_line`).
    fn set_format(&mut self, format: &DeviceFormat) -> io::Result<DeviceFormat>;

    /// Ask the driver for `count` buffers. Returns how many were granted.
    /// A count of zero frees the driver's buffers.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// Query buffer `index` and map it into our address space
    fn map_buffer(&mut self, index: u32) -> io::Result<Box<dyn BufferMemory>>;

    /// Hand buffer `index` to the driver for filling
    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// Take the next filled buffer back from the driver
    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer>;

    /// Wait up to `timeout` for a filled buffer. `Ok(false)` on timeout.
    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    fn stream_on(&mut self) -> io::Result<()>;

    fn stream_off(&mut self) -> io::Result<()>;
}
