// SPDX-License-Identifier: GPL-3.0-only

//! Frame acquisition
//!
//! - [`buffer_ring`]: driver-shared buffers and their ownership
//! - [`engine`]: the streaming state machine and the capture thread
//! - [`handoff`]: latest-wins delivery of frames to the preview

pub mod buffer_ring;
pub mod engine;
pub mod handoff;

pub use buffer_ring::{BufferOwner, BufferRing, CaptureBuffer};
pub use engine::{
    CaptureEngine, CaptureHandle, CaptureSettings, CaptureSummary, EngineState, SessionInfo,
    StepOutcome,
};
pub use handoff::{
    DecodedFrame, FrameChannel, FrameConsumer, FrameNotifier, FrameProducer, HandoffStats, Wake,
    WakeSender, frame_handoff, wake_channel,
};
