//! External tool locations.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// An external program plus the arguments that always precede the
/// per-call arguments (e.g. `python3 /opt/upscale/run.py`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    /// Tool invoked by program name or path with no leading arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add leading arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Parse a whitespace-separated command line such as `python3 upscale.py`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts))
    }

    /// Start building a process for this tool.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Locate the program, either on `PATH` or as an explicit path.
    pub fn resolve(&self) -> MediaResult<PathBuf> {
        let path = Path::new(&self.program);
        if path.components().count() > 1 {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(MediaError::ToolNotFound(self.program.clone()));
        }
        which::which(&self.program).map_err(|_| MediaError::ToolNotFound(self.program.clone()))
    }

    /// Display form used in logs.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// The encoder and probe used by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTools {
    pub ffmpeg: ToolCommand,
    pub ffprobe: ToolCommand,
}

impl Default for MediaTools {
    fn default() -> Self {
        Self {
            ffmpeg: ToolCommand::new("ffmpeg"),
            ffprobe: ToolCommand::new("ffprobe"),
        }
    }
}

impl MediaTools {
    /// Check that both tools can be found.
    pub fn check(&self) -> MediaResult<()> {
        self.ffmpeg.resolve()?;
        self.ffprobe.resolve()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_line() {
        let tool = ToolCommand::parse("python3  /opt/upscale/run.py --fast").unwrap();
        assert_eq!(tool.program, "python3");
        assert_eq!(tool.args, vec!["/opt/upscale/run.py", "--fast"]);
        assert_eq!(tool.display(), "python3 /opt/upscale/run.py --fast");

        assert!(ToolCommand::parse("   ").is_none());
    }

    #[test]
    fn test_resolve_missing_explicit_path() {
        let tool = ToolCommand::new("/definitely/not/here/ffmpeg");
        assert!(matches!(tool.resolve(), Err(MediaError::ToolNotFound(_))));
    }
}
