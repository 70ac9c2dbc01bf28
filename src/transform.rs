// SPDX-License-Identifier: GPL-3.0-only

//! Presentation transform: rotation, mirroring and colormap
//!
//! Owned by the preview and changed only by user commands. The renderer
//! reads it once per drawn frame.

use crate::palette::Colormap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// Mirror applied before rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MirrorMode {
    #[default]
    #[serde(rename = "no")]
    None,
    #[serde(rename = "h")]
    Horizontal,
    #[serde(rename = "v")]
    Vertical,
    #[serde(rename = "hv")]
    Both,
}

impl MirrorMode {
    /// Cycling order
    pub const ALL: [MirrorMode; 4] = [
        MirrorMode::None,
        MirrorMode::Horizontal,
        MirrorMode::Vertical,
        MirrorMode::Both,
    ];

    /// Short name as accepted on the command line
    pub fn flag(self) -> &'static str {
        match self {
            MirrorMode::None => "no",
            MirrorMode::Horizontal => "h",
            MirrorMode::Vertical => "v",
            MirrorMode::Both => "hv",
        }
    }

    pub fn flips_horizontal(self) -> bool {
        matches!(self, MirrorMode::Horizontal | MirrorMode::Both)
    }

    pub fn flips_vertical(self) -> bool {
        matches!(self, MirrorMode::Vertical | MirrorMode::Both)
    }

    fn position(self) -> usize {
        match self {
            MirrorMode::None => 0,
            MirrorMode::Horizontal => 1,
            MirrorMode::Vertical => 2,
            MirrorMode::Both => 3,
        }
    }

    /// Step through the four modes, wrapping around
    pub fn cycle(self, step: i32) -> Self {
        let len = Self::ALL.len() as i32;
        Self::ALL[(self.position() as i32 + step).rem_euclid(len) as usize]
    }
}

impl FromStr for MirrorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.flag() == s)
            .ok_or_else(|| format!("invalid FLIP value: {} (expected no, h, v or hv)", s))
    }
}

impl std::fmt::Display for MirrorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.flag())
    }
}

/// Current presentation transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransformState {
    rotation: i32,
    mirror: MirrorMode,
    colormap: Colormap,
}

impl TransformState {
    pub fn new(rotation: i32, mirror: MirrorMode, colormap: Colormap) -> Self {
        Self {
            rotation: rotation.rem_euclid(360),
            mirror,
            colormap,
        }
    }

    /// Rotation in degrees, always in `0..360`
    pub fn rotation(&self) -> i32 {
        self.rotation
    }

    pub fn mirror(&self) -> MirrorMode {
        self.mirror
    }

    pub fn colormap(&self) -> Colormap {
        self.colormap
    }

    /// Add `delta` degrees
    pub fn rotate(&mut self, delta: i32) {
        self.rotation = (self.rotation + delta.rem_euclid(360)).rem_euclid(360);
    }

    pub fn set_mirror(&mut self, mode: MirrorMode) {
        self.mirror = mode;
    }

    /// Next (`1`) or previous (`-1`) mirror mode
    pub fn cycle_mirror(&mut self, direction: i32) {
        self.mirror = self.mirror.cycle(direction);
    }

    /// Select a colormap by name; unknown names fall back to grayscale
    pub fn set_colormap(&mut self, name: &str) {
        self.colormap = Colormap::from_name(name).unwrap_or_else(|| {
            warn!(
                colormap = %name,
                available = %Colormap::names(),
                "Unknown colormap, using grayscale"
            );
            Colormap::Grayscale
        });
    }

    /// Next (`1`) or previous (`-1`) colormap
    pub fn cycle_colormap(&mut self, direction: i32) {
        self.colormap = self.colormap.cycle(direction);
    }
}
