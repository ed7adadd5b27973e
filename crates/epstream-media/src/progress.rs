//! Parsing of FFmpeg's `-progress` key=value stream.

use serde::Serialize;
use std::time::Duration;

/// One `-progress` block, closed by its `progress=` line.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FfmpegProgress {
    pub frame: u64,
    /// Media time written so far
    pub out_time: Duration,
    /// Encoding speed relative to realtime, when reported
    pub speed: Option<f64>,
    /// Set on the final `progress=end` block
    pub finished: bool,
}

impl FfmpegProgress {
    /// Share of `total` written so far, as a percentage. 100 once finished.
    pub fn percent_of(&self, total: Duration) -> f64 {
        if self.finished {
            return 100.0;
        }
        if total.is_zero() {
            return 0.0;
        }
        (self.out_time.as_secs_f64() / total.as_secs_f64() * 100.0).clamp(0.0, 100.0)
    }

    /// Wall time left at the current speed.
    pub fn eta(&self, total: Duration) -> Option<Duration> {
        let speed = self.speed.filter(|s| *s > 0.0)?;
        if self.out_time.is_zero() {
            return None;
        }
        let remaining = total.saturating_sub(self.out_time);
        Duration::try_from_secs_f64(remaining.as_secs_f64() / speed).ok()
    }
}

/// Folds `-progress` lines into [`FfmpegProgress`] snapshots.
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: FfmpegProgress,
}

impl ProgressParser {
    /// Whether `line` is part of the progress stream rather than an encoder
    /// diagnostic.
    pub fn is_progress_line(line: &str) -> bool {
        let Some((key, _)) = line.trim().split_once('=') else {
            return false;
        };
        matches!(
            key,
            "frame"
                | "fps"
                | "bitrate"
                | "total_size"
                | "out_time_us"
                | "out_time_ms"
                | "out_time"
                | "dup_frames"
                | "drop_frames"
                | "speed"
                | "progress"
        ) || key.starts_with("stream_")
    }

    /// Feed one line. Returns a snapshot when the line closes a block.
    pub fn feed(&mut self, line: &str) -> Option<FfmpegProgress> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        match key {
            // out_time_ms is microseconds too
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<u64>() {
                    self.current.out_time = Duration::from_micros(us);
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.current.frame = frame;
                }
            }
            "speed" => {
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                    self.current.speed = Some(speed);
                }
            }
            "progress" => {
                self.current.finished = value == "end";
                return Some(self.current.clone());
            }
            _ => {}
        }

        None
    }
}
