//! Stdout marker parsing for the upscale subprocess.
//!
//! The upscaler reports its result by printing marker lines. Parsing sits
//! behind [`MarkerParser`] so the line format can change without touching
//! the supervisor.

use serde::Deserialize;
use std::path::PathBuf;

/// A recognized stdout line.
#[derive(Debug, Clone, PartialEq)]
pub enum Marker {
    /// The subprocess acknowledged its input
    Input(PathBuf),
    /// Periodic progress report
    Progress {
        percent: Option<f64>,
        detail: String,
    },
    /// Final output file path
    Output(PathBuf),
}

/// Turns one stdout line into a [`Marker`], if it is one.
pub trait MarkerParser: Send + Sync {
    fn parse(&self, line: &str) -> Option<Marker>;
}

/// Prefix-based parser for the upscaler's plain-text log lines:
///
/// ```text
/// Processing: /uploads/ep-1.mp4
/// Progress: 12/48
/// Output saved to: /uploads/ep-1_upscaled.mp4
/// ```
#[derive(Debug, Clone)]
pub struct LineMarkerParser {
    pub input_prefix: String,
    pub progress_prefix: String,
    pub output_prefix: String,
}

impl Default for LineMarkerParser {
    fn default() -> Self {
        Self {
            input_prefix: "Processing:".to_string(),
            progress_prefix: "Progress:".to_string(),
            output_prefix: "Output saved to:".to_string(),
        }
    }
}

impl LineMarkerParser {
    fn value_after<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
        let at = line.find(prefix)?;
        let value = line[at + prefix.len()..].trim();
        (!value.is_empty()).then_some(value)
    }
}

impl MarkerParser for LineMarkerParser {
    fn parse(&self, line: &str) -> Option<Marker> {
        let line = line.trim();

        if let Some(path) = Self::value_after(line, &self.output_prefix) {
            return Some(Marker::Output(PathBuf::from(unquote(path))));
        }
        if let Some(detail) = Self::value_after(line, &self.progress_prefix) {
            return Some(Marker::Progress {
                percent: parse_percent(detail),
                detail: detail.to_string(),
            });
        }
        if let Some(path) = Self::value_after(line, &self.input_prefix) {
            return Some(Marker::Input(PathBuf::from(unquote(path))));
        }

        None
    }
}

/// Parser for one-JSON-object-per-line output:
///
/// ```text
/// {"event":"progress","percent":42.0}
/// {"event":"output","path":"/uploads/ep-1_upscaled.mp4"}
/// ```
#[derive(Debug, Clone, Default)]
pub struct JsonMarkerParser;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum JsonMarker {
    Input {
        path: PathBuf,
    },
    Progress {
        percent: Option<f64>,
        #[serde(default)]
        message: Option<String>,
    },
    Output {
        path: PathBuf,
    },
}

impl MarkerParser for JsonMarkerParser {
    fn parse(&self, line: &str) -> Option<Marker> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }

        match serde_json::from_str::<JsonMarker>(line).ok()? {
            JsonMarker::Input { path } => Some(Marker::Input(path)),
            JsonMarker::Progress { percent, message } => Some(Marker::Progress {
                percent: percent.map(|p| p.clamp(0.0, 100.0)),
                detail: message.unwrap_or_default(),
            }),
            JsonMarker::Output { path } => Some(Marker::Output(path)),
        }
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
}

/// Read `42%`, `42.5 %` or `12/48` as a percentage.
fn parse_percent(detail: &str) -> Option<f64> {
    let token = detail.split_whitespace().next()?;

    if let Some(pct) = token.strip_suffix('%') {
        return pct.parse::<f64>().ok().map(|p| p.clamp(0.0, 100.0));
    }

    if let Some((done, total)) = token.split_once('/') {
        let done: f64 = done.parse().ok()?;
        let total: f64 = total.parse().ok()?;
        if total > 0.0 {
            return Some((done / total * 100.0).clamp(0.0, 100.0));
        }
        return None;
    }

    let pct = detail.strip_suffix('%')?.trim();
    pct.parse::<f64>().ok().map(|p| p.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_markers() {
        let parser = LineMarkerParser::default();

        assert_eq!(
            parser.parse("Processing: /uploads/ep-1.mp4"),
            Some(Marker::Input(PathBuf::from("/uploads/ep-1.mp4")))
        );
        assert_eq!(
            parser.parse("[INFO] Output saved to: \"/uploads/ep 1_up.mp4\""),
            Some(Marker::Output(PathBuf::from("/uploads/ep 1_up.mp4")))
        );
        assert_eq!(
            parser.parse("Progress: 12/48 frames"),
            Some(Marker::Progress {
                percent: Some(25.0),
                detail: "12/48 frames".into()
            })
        );
        assert_eq!(parser.parse("loading model weights"), None);
        assert_eq!(parser.parse("Output saved to:   "), None);
    }

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent("42%"), Some(42.0));
        assert_eq!(parse_percent("42.5 %"), Some(42.5));
        assert_eq!(parse_percent("150%"), Some(100.0));
        assert_eq!(parse_percent("3/0"), None);
        assert_eq!(parse_percent("tile 3"), None);
    }

    #[test]
    fn test_json_markers() {
        let parser = JsonMarkerParser;

        assert_eq!(
            parser.parse(r#"{"event":"output","path":"/tmp/out.mp4"}"#),
            Some(Marker::Output(PathBuf::from("/tmp/out.mp4")))
        );
        assert_eq!(
            parser.parse(r#"{"event":"progress","percent":42.0}"#),
            Some(Marker::Progress {
                percent: Some(42.0),
                detail: String::new()
            })
        );
        assert_eq!(parser.parse("Output saved to: /tmp/out.mp4"), None);
        assert_eq!(parser.parse(r#"{"event":"unknown"}"#), None);
    }
}
