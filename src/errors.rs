// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture engine and preview

use std::fmt;

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Main capture error type
///
/// Variants fall into three groups:
/// - startup errors, raised before the capture thread exists
/// - per-iteration errors, logged by the capture loop which then continues
/// - runtime errors, which end the capture loop and tear down the session
#[derive(Debug, Clone)]
pub enum CaptureError {
    /// Device node could not be opened
    DeviceOpen { path: String, reason: String },
    /// Device lacks a capability the preview needs (capture, streaming I/O)
    Capability(String),
    /// Buffer request failed or the driver granted fewer buffers than requested
    DeviceResource(String),
    /// Negotiated pixel format cannot be displayed
    UnsupportedFormat(String),
    /// No buffer became ready within the poll timeout
    PollTimeout { timeout_ms: u64 },
    /// Kernel I/O failed (dequeue, queue, stream on/off)
    DeviceIo(String),
    /// A buffer was used against its ownership state
    Ownership(String),
    /// Operation not valid in the engine's current state
    InvalidState(String),
    /// Preview surface could not be set up
    Presentation(String),
    /// Capture thread panicked
    ThreadPanicked,
}

impl CaptureError {
    /// Whether the capture loop may log this error and keep going
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureError::PollTimeout { .. })
    }

    /// Process exit status for a fatal error
    ///
    /// Device problems exit with 3, everything else with 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            CaptureError::DeviceOpen { .. }
            | CaptureError::Capability(_)
            | CaptureError::DeviceResource(_)
            | CaptureError::UnsupportedFormat(_)
            | CaptureError::DeviceIo(_) => 3,
            _ => 1,
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::DeviceOpen { path, reason } => {
                write!(f, "Cannot open {}: {}", path, reason)
            }
            CaptureError::Capability(msg) => write!(f, "Unsupported device: {}", msg),
            CaptureError::DeviceResource(msg) => write!(f, "Buffer allocation failed: {}", msg),
            CaptureError::UnsupportedFormat(msg) => write!(f, "Invalid pixel format: {}", msg),
            CaptureError::PollTimeout { timeout_ms } => {
                write!(f, "No frame within {} ms", timeout_ms)
            }
            CaptureError::DeviceIo(msg) => write!(f, "Device I/O error: {}", msg),
            CaptureError::Ownership(msg) => write!(f, "Buffer ownership violation: {}", msg),
            CaptureError::InvalidState(msg) => write!(f, "Invalid engine state: {}", msg),
            CaptureError::Presentation(msg) => write!(f, "Preview error: {}", msg),
            CaptureError::ThreadPanicked => write!(f, "Capture thread panicked"),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::DeviceIo(err.to_string())
    }
}

/// Per-frame decode failure
///
/// Never fatal: the frame is dropped and the previous one stays on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Compressed stream could not be decoded
    Corrupt(String),
    /// Compressed image does not match the negotiated size
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// Decoder produced a pixel layout we cannot expand to RGB
    UnsupportedLayout(String),
    /// Buffer carried no payload
    Empty,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Corrupt(msg) => write!(f, "corrupt frame: {}", msg),
            DecodeError::DimensionMismatch { expected, actual } => write!(
                f,
                "frame is {}x{}, expected {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
            DecodeError::UnsupportedLayout(msg) => write!(f, "unsupported layout: {}", msg),
            DecodeError::Empty => write!(f, "empty frame"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Configuration file errors
#[derive(Debug)]
pub enum ConfigError {
    /// File could not be read
    Io(std::io::Error),
    /// File is not valid JSON for [`crate::config::Config`]
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Cannot read config: {}", e),
            ConfigError::Parse(e) => write!(f, "Malformed config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeouts_are_recoverable() {
        assert!(CaptureError::PollTimeout { timeout_ms: 1000 }.is_recoverable());
        assert!(!CaptureError::DeviceIo("dqbuf".into()).is_recoverable());
        assert!(!CaptureError::DeviceResource("short".into()).is_recoverable());
    }

    #[test]
    fn test_exit_codes() {
        let open = CaptureError::DeviceOpen {
            path: "/dev/video9".into(),
            reason: "No such file or directory".into(),
        };
        assert_eq!(open.exit_code(), 3);
        assert_eq!(CaptureError::UnsupportedFormat("H264".into()).exit_code(), 3);
        assert_eq!(CaptureError::Presentation("tty".into()).exit_code(), 1);
    }

    #[test]
    fn test_io_error_maps_to_device_io() {
        let err: CaptureError = std::io::Error::other("boom").into();
        assert!(matches!(err, CaptureError::DeviceIo(ref m) if m.contains("boom")));
    }
}
