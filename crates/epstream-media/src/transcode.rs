//! Segmented HLS encoding of one quality tier.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use epstream_models::{ProcessedQuality, QualityTier, SourceMetadata};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::task::{ProgressHandle, TaskProgress, TaskStream};
use crate::tools::{MediaTools, ToolCommand};

/// File name of each tier's sub-playlist.
pub const TIER_PLAYLIST_NAME: &str = "playlist.m3u8";

/// Segment file pattern inside a tier directory.
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";

/// Encoder settings shared by every tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HlsSettings {
    /// Target segment duration in seconds
    pub segment_seconds: u32,
    /// Keyframe cadence in seconds
    pub keyframe_seconds: u32,
    pub video_codec: String,
    pub preset: String,
    /// Quality target used alongside the bitrate ceiling
    pub crf: u8,
    pub audio_codec: String,
}

impl Default for HlsSettings {
    fn default() -> Self {
        Self {
            segment_seconds: 10,
            keyframe_seconds: 2,
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
        }
    }
}

/// Drives FFmpeg to produce one HLS variant per call.
#[derive(Debug, Clone)]
pub struct TranscodeEngine {
    ffmpeg: ToolCommand,
    settings: HlsSettings,
}

impl TranscodeEngine {
    pub fn new(tools: &MediaTools) -> Self {
        Self {
            ffmpeg: tools.ffmpeg.clone(),
            settings: HlsSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: HlsSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &HlsSettings {
        &self.settings
    }

    /// Build the FFmpeg invocation for one tier.
    pub fn build_command(
        &self,
        input: &Path,
        tier_dir: &Path,
        tier: &QualityTier,
        fps: f64,
    ) -> FfmpegCommand {
        let s = &self.settings;
        let gop = (fps * f64::from(s.keyframe_seconds)).round().max(1.0) as u32;

        FfmpegCommand::new(input, tier_dir.join(TIER_PLAYLIST_NAME))
            .video_codec(s.video_codec.clone())
            .preset(s.preset.clone())
            .crf(s.crf)
            .bitrate_ceiling(tier.video_bitrate_kbps)
            .video_filter(format!(
                "scale={}:{}",
                tier.resolution.width, tier.resolution.height
            ))
            .keyframe_cadence(gop, s.keyframe_seconds)
            .audio_codec(s.audio_codec.clone())
            .audio_bitrate_kbps(tier.audio_bitrate_kbps)
            .hls_output(s.segment_seconds, &tier_dir.join(SEGMENT_PATTERN))
    }

    /// Encode `tier` into `<output_dir>/<tier name>/`.
    ///
    /// The returned stream reports encoder progress as a percentage of the
    /// source duration and ends with the tier's [`ProcessedQuality`].
    pub fn transcode(
        &self,
        input: &Path,
        output_dir: &Path,
        tier: &QualityTier,
        source: &SourceMetadata,
    ) -> TaskStream<ProcessedQuality> {
        let (sender, stream) = TaskStream::channel();

        let engine = self.clone();
        let input = input.to_path_buf();
        let output_dir = output_dir.to_path_buf();
        let tier = tier.clone();
        let fps = source.frames_per_second;
        let total = source.duration();
        let cancel = sender.cancel_token();
        let progress = sender.progress_handle();

        tokio::spawn(async move {
            let result = engine
                .run_tier(&input, &output_dir, &tier, fps, total, cancel, progress)
                .await;
            sender.finish(result);
        });

        stream
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_tier(
        &self,
        input: &Path,
        output_dir: &Path,
        tier: &QualityTier,
        fps: f64,
        total: Duration,
        cancel: CancellationToken,
        progress: ProgressHandle<ProcessedQuality>,
    ) -> MediaResult<ProcessedQuality> {
        let tier_dir: PathBuf = output_dir.join(&tier.name);
        tokio::fs::create_dir_all(&tier_dir).await.map_err(|e| {
            MediaError::conversion(
                &tier.name,
                format!("cannot create {}: {}", tier_dir.display(), e),
            )
        })?;

        let cmd = self.build_command(input, &tier_dir, tier, fps);
        let runner = FfmpegRunner::new(self.ffmpeg.clone()).with_cancel(cancel);

        info!(
            tier = %tier.name,
            resolution = %tier.resolution,
            bitrate_kbps = tier.video_bitrate_kbps,
            "Transcoding tier"
        );
        let started = Instant::now();

        let mut last_percent = 0.0_f64;
        let tier_name = tier.name.clone();
        runner
            .run_with_progress(&cmd, move |p| {
                let percent = p.percent_of(total);
                if percent > last_percent {
                    last_percent = percent;
                    debug!(
                        tier = %tier_name,
                        percent,
                        eta_secs = ?p.eta(total).map(|d| d.as_secs()),
                        "Encoder progress"
                    );
                    progress.progress(TaskProgress::percent(percent));
                }
            })
            .await
            .map_err(|e| match e {
                MediaError::FfmpegFailed {
                    message, stderr, ..
                } => MediaError::conversion(&tier.name, stderr.unwrap_or(message)),
                MediaError::Cancelled => MediaError::Cancelled,
                other => MediaError::conversion(&tier.name, other.to_string()),
            })?;

        let playlist = tier_dir.join(TIER_PLAYLIST_NAME);
        if !tokio::fs::try_exists(&playlist).await.unwrap_or(false) {
            return Err(MediaError::conversion(
                &tier.name,
                format!("encoder produced no playlist at {}", playlist.display()),
            ));
        }

        info!(
            tier = %tier.name,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Tier transcoded"
        );

        Ok(ProcessedQuality {
            name: tier.name.clone(),
            resolution: tier.resolution,
            video_bitrate_kbps: tier.video_bitrate_kbps,
            playlist_path: format!("{}/{}", tier.name, TIER_PLAYLIST_NAME),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epstream_models::Resolution;

    fn tier() -> QualityTier {
        QualityTier {
            name: "480p".into(),
            resolution: Resolution::new(640, 360),
            video_bitrate_kbps: 1000,
            audio_bitrate_kbps: 128,
        }
    }

    fn arg_after<'a>(args: &'a [String], flag: &str) -> &'a str {
        let at = args.iter().position(|a| a == flag).unwrap();
        &args[at + 1]
    }

    #[test]
    fn test_hls_arguments() {
        let engine = TranscodeEngine::new(&MediaTools::default());
        let args = engine
            .build_command(Path::new("in.mp4"), Path::new("/out/480p"), &tier(), 29.97)
            .build_args();

        assert_eq!(arg_after(&args, "-hls_time"), "10");
        assert_eq!(arg_after(&args, "-hls_list_size"), "0");
        assert_eq!(arg_after(&args, "-g"), "60");
        assert_eq!(arg_after(&args, "-maxrate"), "1000k");
        assert_eq!(arg_after(&args, "-bufsize"), "2000k");
        assert_eq!(arg_after(&args, "-crf"), "23");
        assert_eq!(arg_after(&args, "-vf"), "scale=640:360");
        assert_eq!(arg_after(&args, "-b:a"), "128k");
        assert_eq!(
            arg_after(&args, "-hls_segment_filename"),
            "/out/480p/segment_%03d.ts"
        );
        assert_eq!(args.last().unwrap(), "/out/480p/playlist.m3u8");
    }

    #[tokio::test]
    async fn test_missing_encoder_is_conversion_error() {
        let dir = tempfile::tempdir().unwrap();
        let tools = MediaTools {
            ffmpeg: ToolCommand::new("/definitely/not/here/ffmpeg"),
            ffprobe: ToolCommand::new("ffprobe"),
        };
        let source = SourceMetadata {
            duration_seconds: 10.0,
            width: 640,
            height: 360,
            codec_name: "h264".into(),
            bitrate_bps: 0,
            frames_per_second: 30.0,
        };

        let err = TranscodeEngine::new(&tools)
            .transcode(Path::new("in.mp4"), dir.path(), &tier(), &source)
            .finish()
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Conversion { ref tier, .. } if tier == "480p"));
    }
}
