//! FFmpeg invocation: argument building and a runner that reports
//! `-progress` snapshots while keeping the encoder's diagnostics.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, BufReader};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::lines::LossyLines;
use crate::progress::{FfmpegProgress, ProgressParser};
use crate::tools::ToolCommand;

/// Trailing diagnostic lines kept for error messages.
const STDERR_TAIL_LINES: usize = 12;

/// Arguments for one FFmpeg run from `input` to `output`.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Placed before `-i`
    pre_input: Vec<String>,
    /// Placed between the input and the output path
    encode: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            pre_input: Vec::new(),
            encode: Vec::new(),
        }
    }

    /// Add an argument before `-i`.
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.pre_input.push(arg.into());
        self
    }

    /// Add an encoding argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.encode.push(arg.into());
        self
    }

    /// Add several encoding arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.encode.extend(args.into_iter().map(Into::into));
        self
    }

    fn flag(self, name: &str, value: impl Into<String>) -> Self {
        self.arg(name).arg(value)
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.flag("-vf", filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.flag("-c:v", codec)
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.flag("-preset", preset)
    }

    pub fn crf(self, crf: u8) -> Self {
        self.flag("-crf", crf.to_string())
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.flag("-c:a", codec)
    }

    pub fn audio_bitrate_kbps(self, kbps: u32) -> Self {
        self.flag("-b:a", format!("{}k", kbps))
    }

    /// Target `kbps` with a matching ceiling and a buffer of twice that.
    pub fn bitrate_ceiling(self, kbps: u32) -> Self {
        self.flag("-b:v", format!("{}k", kbps))
            .flag("-maxrate", format!("{}k", kbps))
            .flag("-bufsize", format!("{}k", kbps.saturating_mul(2)))
    }

    /// Fixed GOP of `gop_frames`, with a keyframe forced every `seconds` so
    /// segment boundaries line up across tiers.
    pub fn keyframe_cadence(self, gop_frames: u32, seconds: u32) -> Self {
        self.flag("-g", gop_frames.to_string())
            .flag("-keyint_min", gop_frames.to_string())
            .flag("-sc_threshold", "0")
            .flag("-force_key_frames", format!("expr:gte(t,n_forced*{})", seconds))
    }

    /// Segmented VOD output: a playlist listing every segment, with segment
    /// files named by `segment_pattern`.
    pub fn hls_output(self, segment_seconds: u32, segment_pattern: &Path) -> Self {
        self.flag("-f", "hls")
            .flag("-hls_time", segment_seconds.to_string())
            .flag("-hls_list_size", "0")
            .flag("-hls_playlist_type", "vod")
            .flag(
                "-hls_segment_filename",
                segment_pattern.to_string_lossy().to_string(),
            )
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Full argument list, progress reporting on stderr included.
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-v", "error", "-nostats", "-progress", "pipe:2"]
            .into_iter()
            .map(String::from)
            .collect();

        args.extend(self.pre_input.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());
        args.extend(self.encode.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runs an [`FfmpegCommand`], optionally cancellable.
pub struct FfmpegRunner {
    ffmpeg: ToolCommand,
    cancel: Option<CancellationToken>,
}

impl FfmpegRunner {
    pub fn new(ffmpeg: ToolCommand) -> Self {
        Self {
            ffmpeg,
            cancel: None,
        }
    }

    /// Kill the encoder when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run `cmd`, handing every closed `-progress` block to `on_progress`.
    ///
    /// On a non-zero exit the last diagnostic stderr lines are attached to
    /// [`MediaError::FfmpegFailed`].
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        on_progress: F,
    ) -> MediaResult<()>
    where
        F: FnMut(FfmpegProgress) + Send + 'static,
    {
        let args = cmd.build_args();
        debug!(program = %self.ffmpeg.display(), args = %args.join(" "), "Starting encoder");

        let mut child = self
            .ffmpeg
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("encoder stderr not captured"))?;
        let reader = tokio::spawn(drain_stderr(stderr, on_progress));

        let status = self.wait(&mut child).await;
        let tail = reader.await.unwrap_or_default();
        let status = status?;

        if status.success() {
            return Ok(());
        }

        Err(MediaError::ffmpeg_failed(
            format!("FFmpeg exited with status {}", status),
            (!tail.is_empty()).then_some(tail),
            status.code(),
        ))
    }

    async fn wait(&self, child: &mut Child) -> MediaResult<ExitStatus> {
        let Some(cancel) = &self.cancel else {
            return Ok(child.wait().await?);
        };

        tokio::select! {
            status = child.wait() => Ok(status?),
            _ = cancel.cancelled() => {
                info!(pid = ?child.id(), "Encoder cancelled, killing");
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
        }
    }
}

/// Split stderr into progress snapshots and a tail of diagnostics.
async fn drain_stderr<R, F>(stderr: R, mut on_progress: F) -> String
where
    R: AsyncRead + Unpin,
    F: FnMut(FfmpegProgress),
{
    let mut parser = ProgressParser::default();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = LossyLines::new(BufReader::new(stderr));

    while let Some(line) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if ProgressParser::is_progress_line(line) {
            if let Some(snapshot) = parser.feed(line) {
                on_progress(snapshot);
            }
            continue;
        }

        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line.to_string());
    }

    Vec::from(tail).join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_after<'a>(args: &'a [String], flag: &str) -> &'a str {
        let at = args.iter().position(|a| a == flag).unwrap();
        &args[at + 1]
    }

    #[test]
    fn test_argument_order() {
        let args = FfmpegCommand::new("input.mp4", "out/playlist.m3u8")
            .input_arg("-hwaccel")
            .input_arg("auto")
            .video_codec("libx264")
            .bitrate_ceiling(1000)
            .build_args();

        assert_eq!(&args[..6], ["-y", "-v", "error", "-nostats", "-progress", "pipe:2"]);
        let input_at = args.iter().position(|a| a == "-i").unwrap();
        assert!(args.iter().position(|a| a == "-hwaccel").unwrap() < input_at);
        assert!(args.iter().position(|a| a == "-c:v").unwrap() > input_at);
        assert_eq!(value_after(&args, "-maxrate"), "1000k");
        assert_eq!(value_after(&args, "-bufsize"), "2000k");
        assert_eq!(args.last().map(String::as_str), Some("out/playlist.m3u8"));
    }

    #[test]
    fn test_keyframe_cadence() {
        let args = FfmpegCommand::new("in.mp4", "out.m3u8")
            .keyframe_cadence(60, 2)
            .build_args();

        assert_eq!(value_after(&args, "-g"), "60");
        assert_eq!(value_after(&args, "-keyint_min"), "60");
        assert_eq!(value_after(&args, "-sc_threshold"), "0");
        assert_eq!(value_after(&args, "-force_key_frames"), "expr:gte(t,n_forced*2)");
    }

    #[test]
    fn test_hls_output() {
        let args = FfmpegCommand::new("in.mp4", "/out/720p/playlist.m3u8")
            .hls_output(10, Path::new("/out/720p/segment_%03d.ts"))
            .build_args();

        assert_eq!(value_after(&args, "-f"), "hls");
        assert_eq!(value_after(&args, "-hls_list_size"), "0");
        assert_eq!(value_after(&args, "-hls_playlist_type"), "vod");
    }

    #[tokio::test]
    async fn test_diagnostics_tail_skips_progress() {
        let stderr: &[u8] = b"frame=1\nout_time_us=1000000\nprogress=continue\n\n\
            first problem\nprogress=end\nsecond problem\n";
        let mut seen = Vec::new();

        let tail = drain_stderr(stderr, |p| seen.push(p)).await;

        assert_eq!(tail, "first problem\nsecond problem");
        assert_eq!(seen.len(), 2);
        assert!(seen[1].finished);
    }

    #[tokio::test]
    async fn test_invalid_utf8_diagnostics_keep_draining() {
        let stderr: &[u8] = b"[h264] bad \xff nal\nout_time_us=2000000\nprogress=end\n";
        let mut seen = Vec::new();

        let tail = drain_stderr(stderr, |p| seen.push(p)).await;

        assert_eq!(tail, "[h264] bad \u{FFFD} nal");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].out_time, std::time::Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let runner = FfmpegRunner::new(ToolCommand::new("/definitely/not/here/ffmpeg"));
        let cmd = FfmpegCommand::new("in.mp4", "out.m3u8");
        assert!(matches!(runner.run(&cmd).await, Err(MediaError::Io(_))));
    }
}
