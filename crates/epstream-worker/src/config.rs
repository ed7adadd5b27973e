//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use epstream_media::{
    supervisor::{DEFAULT_GRACE_PERIOD, DEFAULT_PROGRESS_INTERVAL},
    MediaTools, SupervisorConfig, ToolCommand,
};
use epstream_models::DEFAULT_QUALITIES;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root under which `hls/<episode_id>/` trees are written
    pub storage_root: PathBuf,
    /// FFmpeg binary
    pub ffmpeg: ToolCommand,
    /// FFprobe binary
    pub ffprobe: ToolCommand,
    /// Upscaler program and leading arguments
    pub upscaler: ToolCommand,
    /// Wait between SIGTERM and SIGKILL when cancelling the upscaler
    pub upscaler_grace_period: Duration,
    /// Minimum spacing between upscaler progress events
    pub upscaler_progress_interval: Duration,
    /// Tiers used when a request names none
    pub default_qualities: Vec<String>,
    /// Prometheus listener address
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let tools = MediaTools::default();
        Self {
            storage_root: PathBuf::from("./storage"),
            ffmpeg: tools.ffmpeg,
            ffprobe: tools.ffprobe,
            upscaler: ToolCommand::new("python3").with_args(["upscale.py"]),
            upscaler_grace_period: DEFAULT_GRACE_PERIOD,
            upscaler_progress_interval: DEFAULT_PROGRESS_INTERVAL,
            default_qualities: DEFAULT_QUALITIES.iter().map(|q| q.to_string()).collect(),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            storage_root: std::env::var("EPSTREAM_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            ffmpeg: std::env::var("FFMPEG_PATH")
                .ok()
                .and_then(|s| ToolCommand::parse(&s))
                .unwrap_or(defaults.ffmpeg),
            ffprobe: std::env::var("FFPROBE_PATH")
                .ok()
                .and_then(|s| ToolCommand::parse(&s))
                .unwrap_or(defaults.ffprobe),
            upscaler: std::env::var("UPSCALER_COMMAND")
                .ok()
                .and_then(|s| ToolCommand::parse(&s))
                .unwrap_or(defaults.upscaler),
            upscaler_grace_period: Duration::from_secs(
                std::env::var("UPSCALER_GRACE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_GRACE_PERIOD.as_secs()),
            ),
            upscaler_progress_interval: Duration::from_secs(
                std::env::var("UPSCALER_PROGRESS_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_PROGRESS_INTERVAL.as_secs()),
            ),
            default_qualities: std::env::var("EPSTREAM_DEFAULT_QUALITIES")
                .ok()
                .map(|s| parse_list(&s))
                .filter(|list| !list.is_empty())
                .unwrap_or(defaults.default_qualities),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Directory holding one episode's HLS package.
    pub fn episode_dir(&self, episode_id: &str) -> PathBuf {
        self.storage_root.join("hls").join(episode_id)
    }

    pub fn media_tools(&self) -> MediaTools {
        MediaTools {
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::new(self.upscaler.clone())
            .with_grace_period(self.upscaler_grace_period)
            .with_progress_interval(self.upscaler_progress_interval)
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
