//! Quality tier planning.
//!
//! Maps requested tier names onto concrete encode parameters without ever
//! upscaling past the source.

use tracing::warn;

use epstream_models::{QualityTier, Resolution, SourceMetadata};

/// A named preset in the tier catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPreset {
    pub name: &'static str,
    pub resolution: Resolution,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

/// Tier catalog, lowest first.
pub const TIER_CATALOG: [TierPreset; 3] = [
    TierPreset {
        name: "480p",
        resolution: Resolution::new(854, 480),
        video_bitrate_kbps: 1000,
        audio_bitrate_kbps: 128,
    },
    TierPreset {
        name: "720p",
        resolution: Resolution::new(1280, 720),
        video_bitrate_kbps: 2500,
        audio_bitrate_kbps: 128,
    },
    TierPreset {
        name: "1080p",
        resolution: Resolution::new(1920, 1080),
        video_bitrate_kbps: 5000,
        audio_bitrate_kbps: 192,
    },
];

/// Look up a preset by name.
pub fn find_preset(name: &str) -> Option<&'static TierPreset> {
    TIER_CATALOG.iter().find(|p| p.name.eq_ignore_ascii_case(name.trim()))
}

/// Derive the effective tier for one requested name.
///
/// Unknown names fall back to the lowest tier. When the source is smaller than
/// the preset on either axis, the source's own dimensions are kept, rounded
/// down to even values.
pub fn plan_tier(name: &str, source: &SourceMetadata) -> QualityTier {
    let preset = find_preset(name).unwrap_or_else(|| {
        warn!(requested = name, fallback = TIER_CATALOG[0].name, "Unknown quality tier");
        &TIER_CATALOG[0]
    });

    let target = preset.resolution;
    let resolution = if source.width < target.width || source.height < target.height {
        source.resolution().to_even()
    } else {
        target
    };

    QualityTier {
        name: preset.name.to_string(),
        resolution,
        video_bitrate_kbps: preset.video_bitrate_kbps,
        audio_bitrate_kbps: preset.audio_bitrate_kbps,
    }
}

/// Plan every requested tier, preserving request order.
pub fn plan_tiers<S: AsRef<str>>(names: &[S], source: &SourceMetadata) -> Vec<QualityTier> {
    names.iter().map(|n| plan_tier(n.as_ref(), source)).collect()
}
