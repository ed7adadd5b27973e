//! Probed source video metadata.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::quality::Resolution;

/// Metadata of an uploaded source file, produced once per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    /// Duration in seconds
    pub duration_seconds: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Video codec name as reported by the probe
    pub codec_name: String,
    /// Overall bitrate in bits/second
    pub bitrate_bps: u64,
    /// Frame rate (fps)
    pub frames_per_second: f64,
}

impl SourceMetadata {
    /// Native resolution of the source.
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Source duration. Zero when the probe reported nothing usable.
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration_seconds).unwrap_or_default()
    }
}
