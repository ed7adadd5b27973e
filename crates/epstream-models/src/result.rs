//! Pipeline request options and final result.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tiers encoded when the caller does not ask for specific ones.
pub const DEFAULT_QUALITIES: [&str; 2] = ["480p", "1080p"];

/// Options accepted by the pipeline entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TranscodeOptions {
    /// Ordered list of tier names
    #[serde(default = "default_qualities")]
    pub qualities: Vec<String>,
}

fn default_qualities() -> Vec<String> {
    DEFAULT_QUALITIES.iter().map(|q| q.to_string()).collect()
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            qualities: default_qualities(),
        }
    }
}

impl TranscodeOptions {
    /// Options requesting the given tiers, in order.
    pub fn with_qualities<I, S>(qualities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            qualities: qualities.into_iter().map(Into::into).collect(),
        }
    }

    /// Requested tiers, falling back to the defaults for an empty list.
    pub fn effective_qualities(&self) -> Vec<String> {
        if self.qualities.is_empty() {
            default_qualities()
        } else {
            self.qualities.clone()
        }
    }
}

/// Per-tier entry of a [`ProcessingResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QualityDescriptor {
    /// Tier name
    pub quality: String,
    /// Effective resolution as `WxH`
    pub resolution: String,
    /// Video bitrate in kbps
    pub bitrate: u32,
    /// Sub-playlist path relative to the storage root
    pub file_path: String,
}

/// Result descriptor recorded when a job completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub episode_id: String,
    /// Master playlist path relative to the storage root
    pub hls_path: String,
    pub qualities: Vec<QualityDescriptor>,
    /// Source duration in seconds
    pub duration: f64,
    /// Wall-clock processing time in milliseconds
    pub processing_time: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_qualities() {
        let options = TranscodeOptions::default();
        assert_eq!(options.qualities, vec!["480p", "1080p"]);
    }

    #[test]
    fn test_empty_qualities_fall_back() {
        let options = TranscodeOptions::with_qualities(Vec::<String>::new());
        assert_eq!(options.effective_qualities(), vec!["480p", "1080p"]);
    }

    #[test]
    fn test_options_deserialize_default() {
        let options: TranscodeOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, TranscodeOptions::default());
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = ProcessingResult {
            episode_id: "ep-1".into(),
            hls_path: "hls/ep-1/master.m3u8".into(),
            qualities: vec![],
            duration: 12.5,
            processing_time: 42,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["hlsPath"], "hls/ep-1/master.m3u8");
        assert_eq!(json["processingTime"], 42);
    }
}
