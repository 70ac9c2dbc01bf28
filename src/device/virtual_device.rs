// SPDX-License-Identifier: GPL-3.0-only

//! Scripted in-memory video device
//!
//! Behaves like a V4L2 capture node with MMAP buffers: buffers must be
//! requested, mapped and queued before streaming, DQBUF hands back queued
//! indices in FIFO order, and STREAMOFF returns every queued buffer to
//! userspace. What each dequeue yields is scripted up front with
//! [`VirtualFrame`] entries. Every device call is recorded in a [`CallLog`]
//! that stays readable after the device has been moved into an engine.
//!
//! Only tests construct it. A script runs dry after its last entry, after
//! which every poll times out.

use super::{BufferMemory, DequeuedBuffer, DeviceCapabilities, DeviceFormat, VideoDevice};
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Nominal frame interval used for synthesized timestamps (~30 fps)
const FRAME_INTERVAL: Duration = Duration::from_micros(33_333);

/// Upper bound for the idle sleep when the script has run dry
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// One scripted poll/dequeue outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualFrame {
    /// The driver fills the next queued buffer with these bytes
    Data(Vec<u8>),
    /// Poll expires without a ready buffer
    Timeout,
    /// Poll reports ready but DQBUF fails with EIO
    DequeueError,
}

/// A device call as seen by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCall {
    SetFormat,
    RequestBuffers(u32),
    Map(u32),
    Queue(u32),
    Dequeue(u32),
    StreamOn,
    StreamOff,
}

/// Shared record of device calls, in call order
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<DeviceCall>>>);

impl CallLog {
    fn record(&self, call: DeviceCall) {
        if let Ok(mut calls) = self.0.lock() {
            calls.push(call);
        }
    }

    /// Copy of all calls recorded so far
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.0.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Indices passed to QBUF, in order
    pub fn queued(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DeviceCall::Queue(index) => Some(index),
                _ => None,
            })
            .collect()
    }

    /// Indices returned by DQBUF, in order
    pub fn dequeued(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DeviceCall::Dequeue(index) => Some(index),
                _ => None,
            })
            .collect()
    }

    /// Position of the first occurrence of `call`
    pub fn position(&self, call: DeviceCall) -> Option<usize> {
        self.calls().iter().position(|c| *c == call)
    }
}

/// Buffer memory shared between the device and the mapping it handed out
struct SharedRegion {
    bytes: UnsafeCell<Box<[u8]>>,
}

// SAFETY: the device writes a region only while the buffer is queued
// (kernel-owned); the buffer ring never reads a kernel-owned buffer. This is
// the same contract a driver and a real mmap share.
unsafe impl Sync for SharedRegion {}
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    fn new(len: usize) -> Self {
        Self {
            bytes: UnsafeCell::new(vec![0u8; len].into_boxed_slice()),
        }
    }

    fn len(&self) -> usize {
        // SAFETY: length of the boxed slice never changes.
        unsafe { (*self.bytes.get()).len() }
    }

    /// Fill the region; caller guarantees the buffer is kernel-owned
    fn fill(&self, data: &[u8]) -> usize {
        // SAFETY: see the Sync impl; only called for queued buffers.
        let bytes = unsafe { &mut *self.bytes.get() };
        let n = data.len().min(bytes.len());
        bytes[..n].copy_from_slice(&data[..n]);
        n
    }
}

struct VirtualMapping(Arc<SharedRegion>);

impl BufferMemory for VirtualMapping {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: see the Sync impl on SharedRegion.
        unsafe { &*self.0.bytes.get() }
    }
}

/// Scripted capture device
pub struct VirtualDevice {
    name: String,
    capabilities: DeviceCapabilities,
    format: DeviceFormat,
    reject_set_format: bool,
    /// Row stride the driver applies on S_FMT instead of the requested one
    applied_bytes_per_line: Option<u32>,
    grant_limit: Option<u32>,
    failing_map: Option<u32>,
    /// Number of QBUF calls that succeed before every further one fails
    queue_budget: Option<usize>,
    buffer_len: usize,
    regions: Vec<Arc<SharedRegion>>,
    kernel_queue: VecDeque<u32>,
    script: VecDeque<VirtualFrame>,
    streaming: bool,
    sequence: u32,
    queue_calls: usize,
    log: CallLog,
}

impl VirtualDevice {
    /// Device reporting capture and streaming capabilities with `format`
    pub fn new(format: DeviceFormat) -> Self {
        let buffer_len = (format.bytes_per_line as usize * format.height as usize)
            .max(format.width as usize * format.height as usize * 2);
        Self {
            name: "virtual".to_string(),
            capabilities: DeviceCapabilities {
                driver: "virtual".to_string(),
                card: "Virtual Camera".to_string(),
                bus_info: "platform:virtual".to_string(),
                video_capture: true,
                streaming: true,
            },
            format,
            reject_set_format: false,
            applied_bytes_per_line: None,
            grant_limit: None,
            failing_map: None,
            queue_budget: None,
            buffer_len,
            regions: Vec::new(),
            kernel_queue: VecDeque::new(),
            script: VecDeque::new(),
            streaming: false,
            sequence: 0,
            queue_calls: 0,
            log: CallLog::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Script data frames, delivered in order
    pub fn with_frames<I>(mut self, frames: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        self.script.extend(frames.into_iter().map(VirtualFrame::Data));
        self
    }

    /// Append one scripted outcome
    pub fn push(mut self, frame: VirtualFrame) -> Self {
        self.script.push_back(frame);
        self
    }

    /// Grant at most `count` buffers, whatever is requested
    pub fn granting(mut self, count: u32) -> Self {
        self.grant_limit = Some(count);
        self
    }

    /// Fail every S_FMT request
    pub fn rejecting_set_format(mut self) -> Self {
        self.reject_set_format = true;
        self
    }

    /// Apply `bytes_per_line` on S_FMT, like a driver padding its rows
    pub fn padding_rows_to(mut self, bytes_per_line: u32) -> Self {
        self.applied_bytes_per_line = Some(bytes_per_line);
        self
    }

    /// Fail mapping of buffer `index`
    pub fn failing_map(mut self, index: u32) -> Self {
        self.failing_map = Some(index);
        self
    }

    /// Let the first `count` QBUF calls succeed and fail the rest
    pub fn failing_queue_after(mut self, count: usize) -> Self {
        self.queue_budget = Some(count);
        self
    }

    /// Size of each buffer's memory region
    pub fn with_buffer_len(mut self, len: usize) -> Self {
        self.buffer_len = len;
        self
    }

    /// Handle to the call record
    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    fn has_queued(&self) -> bool {
        !self.kernel_queue.is_empty()
    }
}

fn einval(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.to_string())
}

impl VideoDevice for VirtualDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn query_capabilities(&self) -> io::Result<DeviceCapabilities> {
        Ok(self.capabilities.clone())
    }

    fn get_format(&self) -> io::Result<DeviceFormat> {
        Ok(self.format)
    }

    fn set_format(&mut self, format: &DeviceFormat) -> io::Result<DeviceFormat> {
        self.log.record(DeviceCall::SetFormat);
        if self.reject_set_format {
            return Err(io::Error::new(
                io::ErrorKind::ResourceBusy,
                "format change rejected",
            ));
        }
        let mut applied = *format;
        if let Some(bytes_per_line) = self.applied_bytes_per_line {
            applied.bytes_per_line = bytes_per_line;
        }
        self.buffer_len = self
            .buffer_len
            .max(applied.bytes_per_line as usize * applied.height as usize);
        self.format = applied;
        Ok(applied)
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        self.log.record(DeviceCall::RequestBuffers(count));
        if self.streaming {
            return Err(io::Error::new(io::ErrorKind::ResourceBusy, "streaming"));
        }
        self.kernel_queue.clear();
        let granted = self.grant_limit.map_or(count, |limit| count.min(limit));
        self.regions = (0..granted)
            .map(|_| Arc::new(SharedRegion::new(self.buffer_len)))
            .collect();
        debug!(requested = count, granted, "Virtual buffers allocated");
        Ok(granted)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<Box<dyn BufferMemory>> {
        self.log.record(DeviceCall::Map(index));
        if self.failing_map == Some(index) {
            return Err(io::Error::other(format!("cannot map buffer {}", index)));
        }
        let region = self
            .regions
            .get(index as usize)
            .ok_or_else(|| einval("buffer index out of range"))?;
        Ok(Box::new(VirtualMapping(Arc::clone(region))))
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        self.log.record(DeviceCall::Queue(index));
        self.queue_calls += 1;
        if let Some(budget) = self.queue_budget
            && self.queue_calls > budget
        {
            return Err(io::Error::other("queue rejected by driver"));
        }
        if index as usize >= self.regions.len() {
            return Err(einval("buffer index out of range"));
        }
        if self.kernel_queue.contains(&index) {
            return Err(einval("buffer already queued"));
        }
        self.kernel_queue.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        if !self.streaming || !self.has_queued() {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let data = match self.script.pop_front() {
            Some(VirtualFrame::Data(data)) => data,
            Some(VirtualFrame::DequeueError) => {
                return Err(io::Error::other("input/output error"));
            }
            other => {
                if let Some(frame) = other {
                    self.script.push_front(frame);
                }
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
        };
        let Some(index) = self.kernel_queue.pop_front() else {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        };
        let region = &self.regions[index as usize];
        region.fill(&data);
        self.log.record(DeviceCall::Dequeue(index));

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(DequeuedBuffer {
            index,
            // Reported as-is; a payload longer than the region is clamped by the ring
            bytes_used: data.len().min(u32::MAX as usize) as u32,
            timestamp: FRAME_INTERVAL * sequence,
            sequence,
        })
    }

    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        if !self.streaming {
            return Err(einval("poll on a device that is not streaming"));
        }
        match self.script.front() {
            Some(VirtualFrame::Timeout) => {
                self.script.pop_front();
                Ok(false)
            }
            Some(_) if self.has_queued() => Ok(true),
            _ => {
                std::thread::sleep(timeout.min(IDLE_WAIT));
                Ok(false)
            }
        }
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.log.record(DeviceCall::StreamOn);
        if self.regions.is_empty() {
            return Err(einval("no buffers allocated"));
        }
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.log.record(DeviceCall::StreamOff);
        self.streaming = false;
        self.kernel_queue.clear();
        Ok(())
    }
}
