// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 device with memory-mapped streaming I/O
//!
//! Capability and format negotiation go through the `v4l` crate. The buffer
//! ring ioctls (REQBUFS, QUERYBUF, QBUF, DQBUF, STREAMON, STREAMOFF) are
//! issued directly so that every buffer index stays under our control: the
//! engine decides when a buffer goes back to the kernel.

use super::{BufferMemory, DequeuedBuffer, DeviceCapabilities, DeviceFormat, VideoDevice};
use std::io;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;
use std::time::Duration;
use tracing::{debug, warn};
use v4l::capability::Flags;
use v4l::video::Capture;

// ===== V4L2 constants =====
const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
const V4L2_MEMORY_MMAP: u32 = 1;

// ===== V4L2 ioctl structures =====

/// struct v4l2_requestbuffers
#[repr(C)]
#[derive(Default)]
struct V4l2RequestBuffers {
    count: u32,
    buf_type: u32,
    memory: u32,
    capabilities: u32,
    flags: u8,
    reserved: [u8; 3],
}

/// struct v4l2_timecode
#[repr(C)]
#[derive(Clone, Copy)]
struct V4l2Timecode {
    tc_type: u32,
    flags: u32,
    frames: u8,
    seconds: u8,
    minutes: u8,
    hours: u8,
    userbits: [u8; 4],
}

/// Anonymous union `m` of struct v4l2_buffer
#[repr(C)]
#[derive(Clone, Copy)]
union V4l2BufferM {
    offset: u32,
    userptr: libc::c_ulong,
    planes: *mut libc::c_void,
    fd: i32,
}

/// struct v4l2_buffer
#[repr(C)]
#[derive(Clone, Copy)]
struct V4l2Buffer {
    index: u32,
    buf_type: u32,
    bytesused: u32,
    flags: u32,
    field: u32,
    timestamp: libc::timeval,
    timecode: V4l2Timecode,
    sequence: u32,
    memory: u32,
    m: V4l2BufferM,
    length: u32,
    reserved2: u32,
    request_fd: i32,
}

impl V4l2Buffer {
    fn mmap_capture(index: u32) -> Self {
        // SAFETY: v4l2_buffer is plain old data; all-zero is a valid value.
        let mut buf: V4l2Buffer = unsafe { std::mem::zeroed() };
        buf.index = index;
        buf.buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = V4L2_MEMORY_MMAP;
        buf
    }
}

// ===== V4L2 ioctl numbers =====
// Calculated as: (dir << 30) | (size << 16) | ('V' << 8) | nr
// where dir: 1=WRITE, 2=READ, 3=READ|WRITE. Sizes come from the structs above
// so the numbers are right on both 32- and 64-bit targets.

const fn vidioc(dir: libc::c_ulong, nr: libc::c_ulong, size: usize) -> libc::c_ulong {
    (dir << 30) | ((size as libc::c_ulong) << 16) | ((b'V' as libc::c_ulong) << 8) | nr
}

const VIDIOC_REQBUFS: libc::c_ulong = vidioc(3, 8, std::mem::size_of::<V4l2RequestBuffers>());
const VIDIOC_QUERYBUF: libc::c_ulong = vidioc(3, 9, std::mem::size_of::<V4l2Buffer>());
const VIDIOC_QBUF: libc::c_ulong = vidioc(3, 15, std::mem::size_of::<V4l2Buffer>());
const VIDIOC_DQBUF: libc::c_ulong = vidioc(3, 17, std::mem::size_of::<V4l2Buffer>());
const VIDIOC_STREAMON: libc::c_ulong = vidioc(1, 18, std::mem::size_of::<libc::c_int>());
const VIDIOC_STREAMOFF: libc::c_ulong = vidioc(1, 19, std::mem::size_of::<libc::c_int>());

/// Issue an ioctl, retrying when interrupted by a signal
fn xioctl<T>(fd: RawFd, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
    loop {
        // SAFETY: `arg` points to a live #[repr(C)] value matching `request`.
        let result = unsafe { libc::ioctl(fd, request as _, arg as *mut T) };
        if result >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// One `mmap`ed capture buffer, unmapped on drop
struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is a plain shared mapping; access is serialized by the
// buffer ring's ownership states.
unsafe impl Send for MmapRegion {}

impl BufferMemory for MmapRegion {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe a live mapping owned by self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: the mapping was created by mmap with exactly this length.
        let result = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if result < 0 {
            warn!(error = %io::Error::last_os_error(), "munmap failed");
        }
    }
}

/// A V4L2 capture device node
pub struct V4l2Device {
    path: String,
    device: v4l::Device,
    fd: RawFd,
}

impl V4l2Device {
    /// Open a device node (e.g. `/dev/video0`)
    pub fn open(path: &str) -> io::Result<Self> {
        let device = v4l::Device::with_path(path)?;
        let fd = device.handle().fd();
        debug!(path, fd, "Opened V4L2 device");
        Ok(Self {
            path: path.to_string(),
            device,
            fd,
        })
    }
}

impl VideoDevice for V4l2Device {
    fn name(&self) -> &str {
        &self.path
    }

    fn query_capabilities(&self) -> io::Result<DeviceCapabilities> {
        let caps = self.device.query_caps()?;
        Ok(DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            video_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            streaming: caps.capabilities.contains(Flags::STREAMING),
        })
    }

    fn get_format(&self) -> io::Result<DeviceFormat> {
        let fmt = Capture::format(&self.device)?;
        Ok(DeviceFormat::new(fmt.width, fmt.height, fmt.fourcc, fmt.stride))
    }

    fn set_format(&mut self, format: &DeviceFormat) -> io::Result<DeviceFormat> {
        // Start from the driver's full format so fields we don't track survive
        let mut fmt = Capture::format(&self.device)?;
        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc;
        fmt.stride = format.bytes_per_line;
        let applied = Capture::set_format(&self.device, &fmt)?;
        Ok(DeviceFormat::new(
            applied.width,
            applied.height,
            applied.fourcc,
            applied.stride,
        ))
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut req = V4l2RequestBuffers {
            count,
            buf_type: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: V4L2_MEMORY_MMAP,
            ..Default::default()
        };
        xioctl(self.fd, VIDIOC_REQBUFS, &mut req)?;
        Ok(req.count)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<Box<dyn BufferMemory>> {
        let mut buf = V4l2Buffer::mmap_capture(index);
        xioctl(self.fd, VIDIOC_QUERYBUF, &mut buf)?;

        let len = buf.length as usize;
        // SAFETY: QUERYBUF on an MMAP buffer fills the `offset` member.
        let offset = unsafe { buf.m.offset };
        // SAFETY: mapping a driver buffer at the offset the driver returned.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                self.fd,
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;

        debug!(index, len, offset, "Mapped capture buffer");
        Ok(Box::new(MmapRegion { ptr, len }))
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut buf = V4l2Buffer::mmap_capture(index);
        xioctl(self.fd, VIDIOC_QBUF, &mut buf)
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        let mut buf = V4l2Buffer::mmap_capture(0);
        xioctl(self.fd, VIDIOC_DQBUF, &mut buf)?;
        let timestamp = Duration::from_secs(buf.timestamp.tv_sec.max(0) as u64)
            + Duration::from_micros(buf.timestamp.tv_usec.max(0) as u64);
        Ok(DequeuedBuffer {
            index: buf.index,
            bytes_used: buf.bytesused,
            timestamp,
            sequence: buf.sequence,
        })
    }

    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        // SAFETY: one valid pollfd entry.
        let result = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if result < 0 {
            let err = io::Error::last_os_error();
            // A signal cut the wait short; report it as a timeout
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        if result > 0 && pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(io::Error::other(format!(
                "poll reported device error (revents {:#x})",
                pfd.revents
            )));
        }
        Ok(result > 0)
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        xioctl(self.fd, VIDIOC_STREAMON, &mut buf_type)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        xioctl(self.fd, VIDIOC_STREAMOFF, &mut buf_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ioctl_numbers_match_kernel_headers() {
        assert_eq!(VIDIOC_REQBUFS, 0xC0145608);
        assert_eq!(VIDIOC_STREAMON, 0x40045612);
        assert_eq!(VIDIOC_STREAMOFF, 0x40045613);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_buffer_ioctls_on_64_bit() {
        assert_eq!(std::mem::size_of::<V4l2Buffer>(), 88);
        assert_eq!(VIDIOC_QUERYBUF, 0xC0585609);
        assert_eq!(VIDIOC_QBUF, 0xC058560F);
        assert_eq!(VIDIOC_DQBUF, 0xC0585611);
    }

    #[test]
    fn test_open_missing_device_fails() {
        assert!(V4l2Device::open("/dev/this-video-device-does-not-exist").is_err());
    }
}
