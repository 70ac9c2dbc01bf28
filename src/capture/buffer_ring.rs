// SPDX-License-Identifier: GPL-3.0-only

//! Ring of driver-shared capture buffers
//!
//! Each slot carries an explicit owner. A slot moves through
//!
//! ```text
//! Kernel --dequeue--> Engine --begin_handoff--> Consumer
//!   ^                   |  ^                      |
//!   +------queue--------+  +-----end_handoff------+
//! ```
//!
//! and any call made against the wrong owner is an error. Buffer memory is
//! not reachable through the ring while the kernel owns the slot.

use crate::device::{BufferMemory, VideoDevice};
use crate::errors::{CaptureError, CaptureResult};
use std::io;
use std::time::Duration;
use tracing::{debug, warn};

/// Who may touch a buffer right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwner {
    /// Queued to the driver, which may be writing into it
    Kernel,
    /// Held by the capture engine between dequeue and queue
    Engine,
    /// Being read for the frame handoff
    Consumer,
}

/// One slot of the ring
pub struct CaptureBuffer {
    index: u32,
    memory: Box<dyn BufferMemory>,
    bytes_used: usize,
    timestamp: Duration,
    sequence: u32,
    owner: BufferOwner,
}

impl CaptureBuffer {
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Size of the mapped region
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Payload size of the last dequeue, clamped to the mapped length
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn owner(&self) -> BufferOwner {
        self.owner
    }

    /// Payload of the last dequeue; `None` while the kernel owns the buffer
    pub fn payload(&self) -> Option<&[u8]> {
        match self.owner {
            BufferOwner::Kernel => None,
            _ => Some(&self.memory.as_slice()[..self.bytes_used]),
        }
    }
}

/// Fixed ring of memory-mapped buffers for one device session
pub struct BufferRing {
    buffers: Vec<CaptureBuffer>,
    released: bool,
}

impl BufferRing {
    /// Request `count` buffers and map every buffer the driver grants
    ///
    /// Fails with [`CaptureError::DeviceResource`] when the request fails, when
    /// fewer than `count` buffers are granted, or when any mapping fails. On
    /// failure the grant is handed back to the driver.
    pub fn allocate(device: &mut dyn VideoDevice, count: u32) -> CaptureResult<Self> {
        if count == 0 {
            return Err(CaptureError::DeviceResource(
                "at least one buffer is required".to_string(),
            ));
        }

        let granted = device.request_buffers(count).map_err(|e| {
            CaptureError::DeviceResource(format!("buffer request for {} failed: {}", count, e))
        })?;

        if granted < count {
            free_grant(device);
            return Err(CaptureError::DeviceResource(format!(
                "{} granted {} of {} requested buffers",
                device.name(),
                granted,
                count
            )));
        }

        let mut buffers = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            match device.map_buffer(index) {
                Ok(memory) => buffers.push(CaptureBuffer {
                    index,
                    memory,
                    bytes_used: 0,
                    timestamp: Duration::ZERO,
                    sequence: 0,
                    owner: BufferOwner::Engine,
                }),
                Err(e) => {
                    drop(buffers);
                    free_grant(device);
                    return Err(CaptureError::DeviceResource(format!(
                        "cannot map buffer {}: {}",
                        index, e
                    )));
                }
            }
        }

        debug!(
            device = %device.name(),
            requested = count,
            granted,
            "Buffer ring allocated"
        );

        Ok(Self {
            buffers,
            released: false,
        })
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Slot by index
    pub fn get(&self, index: u32) -> Option<&CaptureBuffer> {
        self.buffers.get(index as usize)
    }

    /// Current owner of slot `index`
    pub fn owner(&self, index: u32) -> Option<BufferOwner> {
        self.get(index).map(CaptureBuffer::owner)
    }

    /// Payload of slot `index`, if userspace owns it
    pub fn data(&self, index: u32) -> Option<&[u8]> {
        self.get(index).and_then(CaptureBuffer::payload)
    }

    /// Number of slots currently owned by `owner`
    pub fn count_owned_by(&self, owner: BufferOwner) -> usize {
        self.buffers.iter().filter(|b| b.owner == owner).count()
    }

    fn slot_mut(
        &mut self,
        index: u32,
        expected: BufferOwner,
        op: &str,
    ) -> CaptureResult<&mut CaptureBuffer> {
        if self.released {
            return Err(CaptureError::InvalidState(format!(
                "{} on a released buffer ring",
                op
            )));
        }
        let buffer = self
            .buffers
            .get_mut(index as usize)
            .ok_or_else(|| CaptureError::Ownership(format!("{}: no buffer {}", op, index)))?;
        if buffer.owner != expected {
            return Err(CaptureError::Ownership(format!(
                "{}: buffer {} is owned by {:?}, expected {:?}",
                op, index, buffer.owner, expected
            )));
        }
        Ok(buffer)
    }

    /// Hand slot `index` to the driver
    pub fn queue(&mut self, device: &mut dyn VideoDevice, index: u32) -> CaptureResult<()> {
        let buffer = self.slot_mut(index, BufferOwner::Engine, "queue")?;
        device
            .queue_buffer(index)
            .map_err(|e| CaptureError::DeviceIo(format!("queue buffer {}: {}", index, e)))?;
        buffer.owner = BufferOwner::Kernel;
        Ok(())
    }

    /// Queue every engine-owned slot, in index order
    pub fn queue_all(&mut self, device: &mut dyn VideoDevice) -> CaptureResult<()> {
        for index in 0..self.buffers.len() as u32 {
            if self.owner(index) == Some(BufferOwner::Engine) {
                self.queue(device, index)?;
            }
        }
        Ok(())
    }

    /// Wait up to `timeout` for a filled buffer and take it from the driver
    ///
    /// Returns [`CaptureError::PollTimeout`] when nothing became ready and
    /// [`CaptureError::DeviceIo`] when the driver failed.
    pub fn dequeue_blocking(
        &mut self,
        device: &mut dyn VideoDevice,
        timeout: Duration,
    ) -> CaptureResult<&CaptureBuffer> {
        if self.released {
            return Err(CaptureError::InvalidState(
                "dequeue on a released buffer ring".to_string(),
            ));
        }
        let timed_out = CaptureError::PollTimeout {
            timeout_ms: timeout.as_millis() as u64,
        };

        let ready = device
            .poll_readable(timeout)
            .map_err(|e| CaptureError::DeviceIo(format!("poll: {}", e)))?;
        if !ready {
            return Err(timed_out);
        }

        let meta = match device.dequeue_buffer() {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(timed_out),
            Err(e) => return Err(CaptureError::DeviceIo(format!("dequeue: {}", e))),
        };

        let buffer = self.slot_mut(meta.index, BufferOwner::Kernel, "dequeue")?;
        buffer.owner = BufferOwner::Engine;
        buffer.bytes_used = (meta.bytes_used as usize).min(buffer.memory.len());
        buffer.timestamp = meta.timestamp;
        buffer.sequence = meta.sequence;
        Ok(buffer)
    }

    /// Lend slot `index` to the consumer side and return its payload
    pub fn begin_handoff(&mut self, index: u32) -> CaptureResult<&[u8]> {
        let buffer = self.slot_mut(index, BufferOwner::Engine, "begin_handoff")?;
        buffer.owner = BufferOwner::Consumer;
        Ok(&buffer.memory.as_slice()[..buffer.bytes_used])
    }

    /// Take slot `index` back from the consumer side
    pub fn end_handoff(&mut self, index: u32) -> CaptureResult<()> {
        let buffer = self.slot_mut(index, BufferOwner::Consumer, "end_handoff")?;
        buffer.owner = BufferOwner::Engine;
        Ok(())
    }

    /// Unmap every buffer and return the grant to the driver
    ///
    /// Must run after stream-off. Safe to call more than once.
    pub fn release(&mut self, device: &mut dyn VideoDevice) {
        if self.released {
            return;
        }
        self.released = true;
        let count = self.buffers.len();
        self.buffers.clear();
        free_grant(device);
        debug!(device = %device.name(), count, "Buffer ring released");
    }
}

/// Best-effort REQBUFS(0)
fn free_grant(device: &mut dyn VideoDevice) {
    if let Err(e) = device.request_buffers(0) {
        warn!(device = %device.name(), error = %e, "Failed to free driver buffers");
    }
}
