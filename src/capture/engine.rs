// SPDX-License-Identifier: GPL-3.0-only

//! Capture engine: device negotiation, streaming state machine and the
//! acquisition loop
//!
//! ```text
//! Closed --configure--> Configured --stream_on--> Streaming --stop/fatal--> Stopped
//! ```
//!
//! Each loop iteration polls for a filled buffer, dequeues it, decodes it,
//! copies the result into the frame handoff and re-queues the same buffer.
//! The buffer is lent to the consumer side only while the copy is made, so
//! the driver never gets a buffer back that is still being read.

use super::buffer_ring::BufferRing;
use super::handoff::{DecodedFrame, FrameConsumer, FrameNotifier, FrameProducer, frame_handoff};
use crate::constants::{capture, timing};
use crate::decoder::{PixelFormat, PixelFormatDecoder};
use crate::device::{DeviceCapabilities, DeviceFormat, V4l2Device, VideoDevice};
use crate::errors::{CaptureError, CaptureResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Device open, nothing negotiated yet
    Closed,
    /// Format negotiated, decoder selected, buffers allocated
    Configured,
    /// All buffers queued and the stream is on
    Streaming,
    /// Torn down; terminal
    Stopped,
}

/// Engine tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Buffers requested from the driver
    pub buffer_count: u32,
    /// Wait for a filled buffer before logging a timeout
    pub poll_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            buffer_count: capture::DEFAULT_BUFFER_COUNT,
            poll_timeout: capture::POLL_TIMEOUT,
        }
    }
}

/// What one loop iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Buffer `index` was decoded, handed off and re-queued
    Delivered(u32),
    /// Buffer `index` failed to decode; it was re-queued without a handoff
    Dropped(u32),
    /// No buffer became ready within the poll timeout
    Timeout,
}

/// Session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Buffers dequeued from the driver
    pub frames_captured: u64,
    /// Frames published to the handoff
    pub frames_delivered: u64,
    /// Published frames replaced before the consumer took them
    pub frames_dropped: u64,
    pub decode_failures: u64,
    pub timeouts: u64,
}

/// What was negotiated for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub device: String,
    pub capabilities: DeviceCapabilities,
    pub format: DeviceFormat,
    /// Layout of delivered frames
    pub output: PixelFormat,
    /// Buffers in the ring
    pub buffer_count: usize,
}

/// Capture engine for one device session
pub struct CaptureEngine {
    device: Box<dyn VideoDevice>,
    ring: BufferRing,
    decoder: PixelFormatDecoder,
    settings: CaptureSettings,
    info: SessionInfo,
    state: EngineState,
    summary: CaptureSummary,
}

impl CaptureEngine {
    /// Open a V4L2 device node and configure it
    pub fn open(path: &str, settings: CaptureSettings) -> CaptureResult<Self> {
        let device = V4l2Device::open(path).map_err(|e| CaptureError::DeviceOpen {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        info!(device = %path, "Opened capture device");
        Self::configure(Box::new(device), settings)
    }

    /// Negotiate format, select the decoder and allocate the buffer ring
    ///
    /// Every failure here is a startup error; nothing has been streamed yet.
    pub fn configure(
        mut device: Box<dyn VideoDevice>,
        settings: CaptureSettings,
    ) -> CaptureResult<Self> {
        let name = device.name().to_string();

        let capabilities = device.query_capabilities().map_err(|e| {
            CaptureError::Capability(format!("{}: cannot query capabilities: {}", name, e))
        })?;
        if !capabilities.video_capture {
            return Err(CaptureError::Capability(format!(
                "{} is not a video capture device",
                name
            )));
        }
        if !capabilities.streaming {
            return Err(CaptureError::Capability(format!(
                "{} does not support streaming i/o",
                name
            )));
        }

        let current = device
            .get_format()
            .map_err(|e| CaptureError::DeviceIo(format!("{}: cannot read format: {}", name, e)))?;

        // Some cameras only stream after an explicit S_FMT. The driver may
        // adjust what it applies; a rejection keeps the format read above,
        // unverified.
        let format = match device.set_format(&current) {
            Ok(applied) => {
                if applied != current {
                    info!(
                        device = %name,
                        requested = %current,
                        applied = %applied,
                        bytes_per_line = applied.bytes_per_line,
                        "Driver adjusted format"
                    );
                }
                applied
            }
            Err(e) => {
                warn!(device = %name, error = %e, "Can't set format, keeping current one");
                current
            }
        };

        let decoder = PixelFormatDecoder::new(&format)?;

        let mut buffer_count = settings.buffer_count;
        if buffer_count > capture::MAX_BUFFER_COUNT {
            warn!(
                requested = buffer_count,
                max = capture::MAX_BUFFER_COUNT,
                "Buffer count too large, clamping"
            );
            buffer_count = capture::MAX_BUFFER_COUNT;
        }
        let mut poll_timeout = settings.poll_timeout;
        if poll_timeout > capture::POLL_TIMEOUT {
            warn!(
                requested_ms = poll_timeout.as_millis() as u64,
                max_ms = capture::POLL_TIMEOUT.as_millis() as u64,
                "Poll timeout too large, clamping"
            );
            poll_timeout = capture::POLL_TIMEOUT;
        }
        let ring = BufferRing::allocate(device.as_mut(), buffer_count)?;

        let info = SessionInfo {
            device: name,
            capabilities,
            format,
            output: decoder.output_format(),
            buffer_count: ring.len(),
        };

        info!(
            device = %info.device,
            card = %info.capabilities.card,
            driver = %info.capabilities.driver,
            format = %info.format,
            buffers = info.buffer_count,
            "Capture engine configured"
        );

        let mut engine = Self {
            device,
            ring,
            decoder,
            settings: CaptureSettings {
                buffer_count,
                poll_timeout,
            },
            info,
            state: EngineState::Closed,
            summary: CaptureSummary::default(),
        };
        engine.set_state(EngineState::Configured);
        Ok(engine)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn summary(&self) -> CaptureSummary {
        self.summary
    }

    /// Read-only access to the buffer ring
    pub fn ring(&self) -> &BufferRing {
        &self.ring
    }

    fn set_state(&mut self, state: EngineState) {
        debug!(device = %self.info.device, from = ?self.state, to = ?state, "Engine state");
        self.state = state;
    }

    /// Queue every buffer and turn the stream on
    pub fn stream_on(&mut self) -> CaptureResult<()> {
        if self.state != EngineState::Configured {
            return Err(CaptureError::InvalidState(format!(
                "stream_on in state {:?}",
                self.state
            )));
        }

        let result = self
            .ring
            .queue_all(self.device.as_mut())
            .and_then(|()| {
                self.device
                    .stream_on()
                    .map_err(|e| CaptureError::DeviceIo(format!("stream on: {}", e)))
            });
        if let Err(e) = result {
            error!(device = %self.info.device, error = %e, "Failed to start streaming");
            self.stop();
            return Err(e);
        }

        self.set_state(EngineState::Streaming);
        info!(device = %self.info.device, "Streaming started");
        Ok(())
    }

    /// Run one acquisition iteration
    ///
    /// Poll timeouts and decode failures are reported as outcomes. A dequeue
    /// or re-queue failure tears the session down and is returned.
    pub fn step(&mut self, producer: &mut FrameProducer) -> CaptureResult<StepOutcome> {
        if self.state != EngineState::Streaming {
            return Err(CaptureError::InvalidState(format!(
                "step in state {:?}",
                self.state
            )));
        }

        let index = match self
            .ring
            .dequeue_blocking(self.device.as_mut(), self.settings.poll_timeout)
        {
            Ok(buffer) => buffer.index(),
            Err(e) if e.is_recoverable() => {
                self.summary.timeouts += 1;
                warn!(device = %self.info.device, error = %e, "Timeout occurred");
                return Ok(StepOutcome::Timeout);
            }
            Err(e) => return Err(self.fail(e)),
        };
        self.summary.frames_captured += 1;

        let delivered = match self.hand_off(index, producer) {
            Ok(delivered) => delivered,
            Err(e) => return Err(self.fail(e)),
        };

        if let Err(e) = self.ring.queue(self.device.as_mut(), index) {
            return Err(self.fail(e));
        }

        if self.summary.frames_captured % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(
                device = %self.info.device,
                captured = self.summary.frames_captured,
                delivered = self.summary.frames_delivered,
                decode_failures = self.summary.decode_failures,
                "Capture progress"
            );
        }

        Ok(if delivered {
            StepOutcome::Delivered(index)
        } else {
            StepOutcome::Dropped(index)
        })
    }

    /// Decode buffer `index` and publish a copy; `Ok(false)` on decode failure
    fn hand_off(&mut self, index: u32, producer: &mut FrameProducer) -> CaptureResult<bool> {
        let (timestamp, sequence) = self
            .ring
            .get(index)
            .map(|b| (b.timestamp(), b.sequence()))
            .unwrap_or_default();

        let raw = self.ring.begin_handoff(index)?;
        let frame = match self.decoder.decode(raw) {
            Ok(view) => {
                let mut data = producer.take_buffer();
                data.extend_from_slice(view.data);
                Some(DecodedFrame {
                    channel: producer.channel(),
                    width: view.width,
                    height: view.height,
                    stride: view.stride,
                    format: view.format,
                    data,
                    timestamp,
                    sequence,
                })
            }
            Err(e) => {
                self.summary.decode_failures += 1;
                let failures = self.summary.decode_failures;
                if (failures - 1) % timing::LOG_EVERY_N_FRAMES == 0 {
                    warn!(
                        device = %self.info.device,
                        index,
                        sequence,
                        failures,
                        error = %e,
                        "Dropping frame that failed to decode"
                    );
                }
                None
            }
        };
        self.ring.end_handoff(index)?;

        match frame {
            Some(frame) => {
                producer.publish(frame);
                self.summary.frames_delivered += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Tear down after a fatal runtime error and hand the error back
    fn fail(&mut self, err: CaptureError) -> CaptureError {
        error!(device = %self.info.device, error = %err, "Capture failed");
        self.stop();
        err
    }

    /// Run iterations until `stop` is set or a fatal error occurs, then tear down
    pub fn run(&mut self, producer: &mut FrameProducer, stop: &AtomicBool) -> CaptureResult<()> {
        let result = loop {
            if stop.load(Ordering::Acquire) {
                debug!(device = %self.info.device, "Stop requested");
                break Ok(());
            }
            if let Err(e) = self.step(producer) {
                break Err(e);
            }
        };
        self.stop();
        result
    }

    /// Stream off and release the buffers
    ///
    /// Best effort and idempotent; also runs on drop.
    pub fn stop(&mut self) {
        if self.state == EngineState::Stopped {
            return;
        }
        let was_streaming = self.state == EngineState::Streaming;
        self.set_state(EngineState::Stopped);

        if was_streaming && let Err(e) = self.device.stream_off() {
            warn!(device = %self.info.device, error = %e, "Failed to stop streaming");
        }
        self.ring.release(self.device.as_mut());

        info!(
            device = %self.info.device,
            captured = self.summary.frames_captured,
            delivered = self.summary.frames_delivered,
            decode_failures = self.summary.decode_failures,
            timeouts = self.summary.timeouts,
            "Capture engine stopped"
        );
    }

    /// Start streaming and move the acquisition loop onto its own thread
    ///
    /// Streaming is switched on before the thread is spawned, so startup
    /// errors are returned here and no thread is left behind.
    pub fn start<N>(mut self, notifier: N) -> CaptureResult<(CaptureHandle, FrameConsumer)>
    where
        N: FrameNotifier + 'static,
    {
        let (mut producer, consumer) = frame_handoff(self.decoder.channel(), notifier);
        self.stream_on()?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let info = self.info.clone();

        let thread = thread::Builder::new()
            .name(capture::THREAD_NAME.to_string())
            .spawn(move || {
                debug!(device = %self.info.device, "Capture thread started");
                let result = self.run(&mut producer, &stop_flag);
                let mut summary = self.summary;
                summary.frames_dropped = producer.stats().dropped;
                // Device resources are gone before the consumer hears `Stopped`
                drop(self);
                producer.close();
                result.map(|()| summary)
            })
            .map_err(|e| {
                CaptureError::InvalidState(format!("cannot spawn capture thread: {}", e))
            })?;

        Ok((
            CaptureHandle {
                thread: Some(thread),
                stop,
                info,
            },
            consumer,
        ))
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle to a running capture thread
///
/// Dropping the handle stops the thread and waits for it.
pub struct CaptureHandle {
    thread: Option<JoinHandle<CaptureResult<CaptureSummary>>>,
    stop: Arc<AtomicBool>,
    info: SessionInfo,
}

impl CaptureHandle {
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Whether the capture thread is still running
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Whether the thread has been joined already
    pub fn is_joined(&self) -> bool {
        self.thread.is_none()
    }

    /// Ask the capture thread to stop without waiting
    ///
    /// The loop notices within one poll timeout.
    pub fn request_stop(&self) {
        debug!(device = %self.info.device, "Requesting capture stop");
        self.stop.store(true, Ordering::Release);
    }

    /// Stop the capture thread and wait for it
    pub fn stop(&mut self) -> CaptureResult<CaptureSummary> {
        self.request_stop();
        self.join()
    }

    /// Wait for the capture thread to end on its own
    ///
    /// Returns the session summary, or the fatal error that ended the loop.
    pub fn join(&mut self) -> CaptureResult<CaptureSummary> {
        let handle = self
            .thread
            .take()
            .ok_or_else(|| CaptureError::InvalidState("capture thread already joined".into()))?;
        match handle.join() {
            Ok(result) => result,
            Err(_) => {
                error!(device = %self.info.device, "Capture thread panicked");
                Err(CaptureError::ThreadPanicked)
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            debug!(device = %self.info.device, "CaptureHandle dropped, stopping capture");
            if let Err(e) = self.stop() {
                warn!(error = %e, "Capture ended with an error");
            }
        }
    }
}
