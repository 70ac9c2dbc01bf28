// SPDX-License-Identifier: GPL-3.0-only

//! Persistent preview settings
//!
//! Read from `$XDG_CONFIG_HOME/cameraview/config.json` when the file exists.
//! Missing fields take their defaults; command-line options override the
//! loaded values.

use crate::capture::CaptureSettings;
use crate::constants::{self, APP_NAME, capture};
use crate::errors::ConfigError;
use crate::palette::Colormap;
use crate::transform::{MirrorMode, TransformState};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Video device node
    pub device: String,
    /// Initial rotation in degrees
    pub rotation: i32,
    /// Initial mirror mode (no, h, v, hv)
    pub mirror: MirrorMode,
    /// Initial colormap for greyscale streams; unknown names fall back to grayscale
    pub colormap: String,
    /// Buffers requested from the driver
    pub buffer_count: u32,
    /// Poll timeout in milliseconds
    pub poll_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: constants::DEFAULT_DEVICE.to_string(),
            rotation: 0,
            mirror: MirrorMode::default(),
            colormap: Colormap::default().name().to_string(),
            buffer_count: capture::DEFAULT_BUFFER_COUNT,
            poll_timeout_ms: capture::POLL_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Config {
    /// Location of the config file, if a config directory is known
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.json"))
    }

    /// Load the user's config, falling back to defaults
    ///
    /// A missing file is normal. An unreadable or malformed one is logged
    /// and ignored.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            debug!(path = %path.display(), "No config file");
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => {
                debug!(path = %path.display(), "Loaded config");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring config file");
                Self::default()
            }
        }
    }

    /// Parse a config file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the config as pretty-printed JSON, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Engine settings; the poll timeout is kept within `1..=POLL_TIMEOUT`
    /// so a stop request is seen within one default poll
    pub fn capture_settings(&self) -> CaptureSettings {
        let mut poll_timeout = Duration::from_millis(self.poll_timeout_ms.max(1));
        if poll_timeout > capture::POLL_TIMEOUT {
            warn!(
                requested_ms = self.poll_timeout_ms,
                max_ms = capture::POLL_TIMEOUT.as_millis() as u64,
                "Poll timeout too large, clamping"
            );
            poll_timeout = capture::POLL_TIMEOUT;
        }
        CaptureSettings {
            buffer_count: self.buffer_count,
            poll_timeout,
        }
    }

    pub fn transform_state(&self) -> TransformState {
        let mut state = TransformState::new(self.rotation, self.mirror, Colormap::default());
        state.set_colormap(&self.colormap);
        state
    }
}
