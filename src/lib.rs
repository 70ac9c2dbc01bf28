// SPDX-License-Identifier: GPL-3.0-only

//! cameraview - live preview for V4L2 cameras
//!
//! Frames are captured from a memory-mapped V4L2 device on a dedicated
//! thread, decoded when compressed, and handed to a terminal preview that
//! can rotate, mirror and false-color them.
//!
//! # Architecture
//!
//! - [`device`]: the [`VideoDevice`](device::VideoDevice) abstraction, the
//!   real V4L2 device and a scripted virtual one
//! - [`capture`]: buffer ring, capture engine and frame handoff
//! - [`decoder`]: pixel format mapping and MJPG/JPEG decode
//! - [`transform`] and [`palette`]: presentation state and colormaps
//! - [`terminal`]: the preview
//! - [`config`]: user configuration handling
//!
//! # Example
//!
//! ```no_run
//! use cameraview::capture::{CaptureEngine, CaptureSettings, wake_channel};
//!
//! let engine = CaptureEngine::open("/dev/video0", CaptureSettings::default())?;
//! let (notifier, wakes) = wake_channel();
//! let (mut handle, consumer) = engine.start(notifier)?;
//! if wakes.recv().is_ok() {
//!     if let Some(frame) = consumer.take_latest() {
//!         println!("{}x{} {}", frame.width, frame.height, frame.format);
//!     }
//! }
//! let summary = handle.stop()?;
//! println!("{} frames", summary.frames_captured);
//! # Ok::<(), cameraview::errors::CaptureError>(())
//! ```

pub mod capture;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod device;
pub mod errors;
pub mod format_converters;
pub mod palette;
pub mod terminal;
pub mod transform;

// Re-export commonly used types
pub use capture::{CaptureEngine, CaptureHandle, CaptureSettings, DecodedFrame, FrameConsumer};
pub use config::Config;
pub use decoder::{PixelFormat, PixelFormatDecoder};
pub use errors::{CaptureError, CaptureResult, DecodeError};
pub use palette::Colormap;
pub use transform::{MirrorMode, TransformState};
