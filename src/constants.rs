// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Device node used when none is given
pub const DEFAULT_DEVICE: &str = "/dev/video0";

/// Application name used for config and log directories
pub const APP_NAME: &str = "cameraview";

/// Capture engine tuning
pub mod capture {
    use super::Duration;

    /// Buffers requested from the driver
    pub const DEFAULT_BUFFER_COUNT: u32 = 6;

    /// Upper bound for a buffer request; drivers rarely allow more than 32
    pub const MAX_BUFFER_COUNT: u32 = 32;

    /// Poll timeout before dequeueing. DQBUF would otherwise block forever.
    /// Also the upper bound: a stop request is seen within one poll.
    pub const POLL_TIMEOUT: Duration = Duration::from_millis(1000);

    /// Name of the acquisition thread
    pub const THREAD_NAME: &str = "capture";
}

/// Logging cadence
pub mod timing {
    /// Per-frame warnings (decode failures) are logged once every N occurrences
    pub const LOG_EVERY_N_FRAMES: u64 = 30;

    /// Frame counter modulo for periodic debug logging
    pub const FRAME_LOG_INTERVAL: u64 = 300;
}

/// Terminal preview
pub mod preview {
    use super::Duration;

    /// How long the preview waits for a frame wake before checking input
    pub const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(16);

    /// Rotation step for the rotate shortcuts
    pub const ROTATION_STEP_DEGREES: i32 = 90;
}
