//! Quality tiers and per-tier transcode results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Round each dimension down to the nearest even value.
    ///
    /// H.264 with 4:2:0 chroma rejects odd frame sizes.
    pub fn to_even(self) -> Self {
        Self {
            width: self.width - (self.width % 2),
            height: self.height - (self.height % 2),
        }
    }

    /// Whether both dimensions are even.
    pub fn is_even(&self) -> bool {
        self.width % 2 == 0 && self.height % 2 == 0
    }

    /// Whether this resolution fits inside `other` on both axes.
    pub fn fits_within(&self, other: &Resolution) -> bool {
        self.width <= other.width && self.height <= other.height
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Error parsing a `WxH` resolution string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid resolution: {0}")]
pub struct ResolutionParseError(pub String);

impl FromStr for Resolution {
    type Err = ResolutionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| ResolutionParseError(s.to_string()))?;
        let width = w.trim().parse().map_err(|_| ResolutionParseError(s.to_string()))?;
        let height = h.trim().parse().map_err(|_| ResolutionParseError(s.to_string()))?;
        Ok(Self { width, height })
    }
}

/// Concrete encode parameters for one tier of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QualityTier {
    /// Tier name, e.g. "480p"
    pub name: String,
    /// Effective output resolution
    pub resolution: Resolution,
    /// Video bitrate in kbps
    pub video_bitrate_kbps: u32,
    /// Audio bitrate in kbps
    pub audio_bitrate_kbps: u32,
}

impl QualityTier {
    /// Bandwidth advertised in the master playlist, in bits/second.
    pub fn bandwidth(&self) -> u64 {
        u64::from(self.video_bitrate_kbps) * 1000
    }
}

/// Output of one encoded tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedQuality {
    /// Tier name
    pub name: String,
    /// Effective resolution
    pub resolution: Resolution,
    /// Video bitrate in kbps
    pub video_bitrate_kbps: u32,
    /// Sub-playlist path relative to the episode's output directory
    pub playlist_path: String,
}

impl ProcessedQuality {
    /// Bandwidth advertised in the master playlist, in bits/second.
    pub fn bandwidth(&self) -> u64 {
        u64::from(self.video_bitrate_kbps) * 1000
    }
}
