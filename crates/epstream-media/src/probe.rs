//! FFprobe source analysis.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, info};

use epstream_models::SourceMetadata;

use crate::error::{MediaError, MediaResult};
use crate::tools::ToolCommand;

/// Frame rate assumed when the stream does not report a usable one.
pub const DEFAULT_FPS: f64 = 30.0;

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

/// Probe a source file for metadata.
pub async fn probe_source(
    ffprobe: &ToolCommand,
    path: impl AsRef<Path>,
) -> MediaResult<SourceMetadata> {
    let path = path.as_ref();

    if path.as_os_str().is_empty() || !path.is_file() {
        return Err(MediaError::NotFound(path.to_path_buf()));
    }

    debug!(path = %path.display(), "Probing source");

    let output = ffprobe
        .command()
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| MediaError::analysis(format!("failed to run {}: {}", ffprobe.display(), e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("ffprobe exited with status {}", output.status)
        } else {
            stderr
        };
        return Err(MediaError::analysis(message));
    }

    let metadata = parse_probe_output(&output.stdout)?;

    info!(
        path = %path.display(),
        width = metadata.width,
        height = metadata.height,
        codec = %metadata.codec_name,
        duration = metadata.duration_seconds,
        "Probed source"
    );

    Ok(metadata)
}

/// Turn ffprobe's JSON document into [`SourceMetadata`].
fn parse_probe_output(stdout: &[u8]) -> MediaResult<SourceMetadata> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| MediaError::analysis(format!("unreadable ffprobe output: {}", e)))?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MediaError::analysis("No video stream found"))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(MediaError::analysis("Video stream has no dimensions")),
    };

    let format = probe.format.as_ref();

    let duration_seconds = format
        .and_then(|f| parse_number::<f64>(f.duration.as_deref()))
        .or_else(|| parse_number(video.duration.as_deref()))
        .unwrap_or(0.0);

    let bitrate_bps = format
        .and_then(|f| parse_number::<u64>(f.bit_rate.as_deref()))
        .or_else(|| parse_number(video.bit_rate.as_deref()))
        .unwrap_or(0);

    Ok(SourceMetadata {
        duration_seconds,
        width,
        height,
        codec_name: video.codec_name.clone().unwrap_or_default(),
        bitrate_bps,
        frames_per_second: parse_frame_rate(video.r_frame_rate.as_deref()),
    })
}

fn parse_number<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

/// Parse a rational frame rate such as "30000/1001".
///
/// A missing, zero or unparseable denominator yields [`DEFAULT_FPS`].
fn parse_frame_rate(rate: Option<&str>) -> f64 {
    let Some((num, den)) = rate.and_then(|r| r.split_once('/')) else {
        return DEFAULT_FPS;
    };

    match (num.trim().parse::<f64>(), den.trim().parse::<f64>()) {
        (Ok(num), Ok(den)) if den > 0.0 && num > 0.0 => num / den,
        _ => DEFAULT_FPS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate(Some("30/1")) - 30.0).abs() < 0.01);
        assert!((parse_frame_rate(Some("30000/1001")) - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate(Some("25/0")), DEFAULT_FPS);
        assert_eq!(parse_frame_rate(Some("25")), DEFAULT_FPS);
        assert_eq!(parse_frame_rate(None), DEFAULT_FPS);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "h264", "width": 640, "height": 360,
                 "r_frame_rate": "24/1", "bit_rate": "800000"}
            ],
            "format": {"duration": "12.500000", "bit_rate": "950000"}
        }"#;

        let meta = parse_probe_output(json).unwrap();
        assert_eq!(meta.width, 640);
        assert_eq!(meta.height, 360);
        assert_eq!(meta.codec_name, "h264");
        assert_eq!(meta.bitrate_bps, 950_000);
        assert!((meta.duration_seconds - 12.5).abs() < 1e-9);
        assert!((meta.frames_per_second - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_stream_fallbacks() {
        let json = br#"{
            "streams": [{"codec_type": "video", "codec_name": "hevc", "width": 1920,
                         "height": 1080, "duration": "3.0", "bit_rate": "4000000"}],
            "format": {}
        }"#;

        let meta = parse_probe_output(json).unwrap();
        assert_eq!(meta.bitrate_bps, 4_000_000);
        assert!((meta.duration_seconds - 3.0).abs() < 1e-9);
        assert_eq!(meta.frames_per_second, DEFAULT_FPS);
    }

    #[test]
    fn test_no_video_stream() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "1.0"}}"#;
        let err = parse_probe_output(json).unwrap_err();
        assert!(matches!(err, MediaError::Analysis(ref m) if m == "No video stream found"));
    }

    #[test]
    fn test_video_stream_without_dimensions() {
        for streams in [
            r#"[{"codec_type": "video", "codec_name": "h264"}]"#,
            r#"[{"codec_type": "video", "codec_name": "h264", "width": 0, "height": 360}]"#,
        ] {
            let json = format!(r#"{{"streams": {}, "format": {{"duration": "1.0"}}}}"#, streams);
            let err = parse_probe_output(json.as_bytes()).unwrap_err();
            assert!(matches!(
                err,
                MediaError::Analysis(ref m) if m == "Video stream has no dimensions"
            ));
        }
    }

    #[tokio::test]
    async fn test_missing_file() {
        let tool = ToolCommand::new("ffprobe");
        let err = probe_source(&tool, "/no/such/episode.mp4").await.unwrap_err();
        assert!(matches!(err, MediaError::NotFound(_)));

        let err = probe_source(&tool, "").await.unwrap_err();
        assert!(matches!(err, MediaError::NotFound(_)));
    }
}
