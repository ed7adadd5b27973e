//! Supervision of the external upscale subprocess.
//!
//! [`ProcessSupervisor`] runs at most one upscaler at a time. It watches the
//! child's stdout for marker lines and turns the exit status into a result
//! path or an error. Cancellation frees the supervisor at once, while the
//! child gets a grace period before it is killed.

mod markers;

pub use markers::{JsonMarkerParser, LineMarkerParser, Marker, MarkerParser};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{MediaError, MediaResult};
use crate::lines::LossyLines;
use crate::task::{ProgressHandle, TaskProgress, TaskSender, TaskStream};
use crate::tools::ToolCommand;

/// Default wait between SIGTERM and SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Default minimum spacing between progress events.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Upper bound on reading leftover stdout once the child has exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Events and result of one supervised run.
pub type SupervisedRun = TaskStream<PathBuf>;

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Upscaler program and leading arguments; the input path is appended
    pub command: ToolCommand,
    /// Wait between SIGTERM and SIGKILL on cancellation
    pub grace_period: Duration,
    /// Minimum spacing between progress events
    pub progress_interval: Duration,
}

impl SupervisorConfig {
    pub fn new(command: ToolCommand) -> Self {
        Self {
            command,
            grace_period: DEFAULT_GRACE_PERIOD,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

/// Handle to the live subprocess.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupervisedProcess {
    pub run_id: Uuid,
    pub pid: Option<u32>,
    pub input: PathBuf,
    pub started_at: DateTime<Utc>,
}

struct LiveProcess {
    process: SupervisedProcess,
    cancel: CancellationToken,
}

/// Spawns, watches and cancels the upscale subprocess.
#[derive(Clone)]
pub struct ProcessSupervisor {
    config: Arc<SupervisorConfig>,
    parser: Arc<dyn MarkerParser>,
    live: Arc<Mutex<Option<LiveProcess>>>,
}

impl ProcessSupervisor {
    /// Create a supervisor using the plain-text marker format.
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config: Arc::new(config),
            parser: Arc::new(LineMarkerParser::default()),
            live: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace the stdout marker parser.
    pub fn with_parser(mut self, parser: Arc<dyn MarkerParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Snapshot of the live process, if any.
    pub async fn current(&self) -> Option<SupervisedProcess> {
        self.live.lock().await.as_ref().map(|l| l.process.clone())
    }

    pub async fn is_busy(&self) -> bool {
        self.live.lock().await.is_some()
    }

    /// Start the upscaler on `input`.
    ///
    /// Fails with [`MediaError::Busy`] while another run holds the handle.
    pub async fn spawn(&self, input: impl AsRef<Path>) -> MediaResult<SupervisedRun> {
        let input = input.as_ref().to_path_buf();
        let mut slot = self.live.lock().await;

        if let Some(live) = slot.as_ref() {
            return Err(MediaError::Busy(live.process.pid));
        }

        let mut child = self
            .config
            .command
            .command()
            .arg(&input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let process = SupervisedProcess {
            run_id: Uuid::new_v4(),
            pid: child.id(),
            input,
            started_at: Utc::now(),
        };
        let cancel = CancellationToken::new();

        info!(
            run_id = %process.run_id,
            pid = ?process.pid,
            input = %process.input.display(),
            command = %self.config.command.display(),
            "Spawned upscaler"
        );

        *slot = Some(LiveProcess {
            process: process.clone(),
            cancel: cancel.clone(),
        });
        drop(slot);

        let (sender, stream) = TaskStream::with_token(cancel.clone());
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let supervisor = self.clone();

        tokio::spawn(async move {
            supervisor
                .monitor(child, stdout, stderr, process, cancel, sender)
                .await;
        });

        Ok(stream)
    }

    /// Cancel the live run, if any.
    ///
    /// The handle is released immediately so a new run can start while the
    /// old child is still inside its grace period. Returns whether a run
    /// was live.
    pub async fn cancel(&self) -> bool {
        let live = self.live.lock().await.take();
        match live {
            Some(live) => {
                info!(
                    run_id = %live.process.run_id,
                    pid = ?live.process.pid,
                    "Cancelling upscaler"
                );
                live.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Clear the handle only if it still belongs to `run_id`.
    async fn release(&self, run_id: Uuid) {
        let mut slot = self.live.lock().await;
        if slot.as_ref().map(|l| l.process.run_id) == Some(run_id) {
            *slot = None;
        }
    }

    async fn monitor<O, E>(
        self,
        mut child: Child,
        stdout: Option<O>,
        stderr: Option<E>,
        process: SupervisedProcess,
        cancel: CancellationToken,
        sender: TaskSender<PathBuf>,
    ) where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let pid = process.pid;

        let stdout_task = stdout.map(|out| {
            tokio::spawn(read_markers(
                out,
                Arc::clone(&self.parser),
                sender.progress_handle(),
                self.config.progress_interval,
                pid,
            ))
        });
        let stderr_task = stderr.map(|err| tokio::spawn(log_stderr(err, pid)));

        let status = tokio::select! {
            status = child.wait() => status,
            _ = cancel.cancelled() => terminate(&mut child, self.config.grace_period).await,
        };

        let output = match stdout_task {
            Some(task) => match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, task).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    warn!(pid = ?pid, "Upscaler stdout reader failed: {}", e);
                    None
                }
                Err(_) => {
                    warn!(pid = ?pid, "Upscaler stdout still open after exit");
                    None
                }
            },
            None => None,
        };
        if let Some(task) = stderr_task {
            let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, task).await;
        }

        self.release(process.run_id).await;

        let result = match status {
            Ok(status) => {
                info!(
                    run_id = %process.run_id,
                    pid = ?pid,
                    status = %status,
                    elapsed_ms = (Utc::now() - process.started_at).num_milliseconds(),
                    "Upscaler exited"
                );
                exit_outcome(status.code(), cancel.is_cancelled(), output)
            }
            Err(e) => Err(MediaError::Io(e)),
        };

        sender.finish(result);
    }
}

/// Map an exit into the run's result.
fn exit_outcome(
    code: Option<i32>,
    cancelled: bool,
    output: Option<PathBuf>,
) -> MediaResult<PathBuf> {
    if cancelled {
        return Err(MediaError::Cancelled);
    }

    match code {
        // Killed by a signal
        None => Err(MediaError::Cancelled),
        Some(0) => output.ok_or(MediaError::OutputNotFound),
        Some(code) => Err(MediaError::ProcessExit { code }),
    }
}

/// SIGTERM, then SIGKILL once `grace` has passed.
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    request_stop(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                pid = ?child.id(),
                grace_secs = grace.as_secs_f64(),
                "Upscaler ignored SIGTERM, killing"
            );
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(pid, "Failed to send SIGTERM: {}", e);
        }
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    let _ = child.start_kill();
}

/// Read stdout markers, returning the last reported output path.
async fn read_markers<R>(
    stdout: R,
    parser: Arc<dyn MarkerParser>,
    progress: ProgressHandle<PathBuf>,
    interval: Duration,
    pid: Option<u32>,
) -> Option<PathBuf>
where
    R: AsyncRead + Unpin,
{
    let mut lines = LossyLines::new(BufReader::new(stdout));
    let mut output = None;
    let mut last_emit: Option<Instant> = None;

    while let Some(line) = lines.next_line().await {
        match parser.parse(&line) {
            Some(Marker::Input(path)) => {
                info!(pid = ?pid, input = %path.display(), "Upscaler accepted input");
            }
            Some(Marker::Progress { percent, detail }) => {
                if last_emit.map_or(true, |t| t.elapsed() >= interval) {
                    last_emit = Some(Instant::now());
                    debug!(pid = ?pid, percent = ?percent, "Upscaler progress: {}", detail);
                    progress.progress(TaskProgress {
                        percent,
                        message: (!detail.is_empty()).then_some(detail),
                    });
                }
            }
            Some(Marker::Output(path)) => {
                info!(pid = ?pid, output = %path.display(), "Upscaler reported output");
                output = Some(path);
            }
            None => debug!(pid = ?pid, "upscaler: {}", line),
        }
    }

    output
}

async fn log_stderr<R>(stderr: R, pid: Option<u32>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = LossyLines::new(BufReader::new(stderr));
    while let Some(line) = lines.next_line().await {
        let lower = line.to_lowercase();
        if lower.contains("error") || lower.contains("traceback") {
            warn!(pid = ?pid, "upscaler stderr: {}", line);
        } else {
            debug!(pid = ?pid, "upscaler stderr: {}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_outcome() {
        let path = PathBuf::from("/tmp/out.mp4");

        assert_eq!(exit_outcome(Some(0), false, Some(path.clone())).unwrap(), path);
        assert!(matches!(
            exit_outcome(Some(0), false, None),
            Err(MediaError::OutputNotFound)
        ));
        assert!(matches!(
            exit_outcome(None, false, None),
            Err(MediaError::Cancelled)
        ));
        assert!(matches!(
            exit_outcome(Some(2), false, Some(path.clone())),
            Err(MediaError::ProcessExit { code: 2 })
        ));
        assert!(matches!(
            exit_outcome(Some(0), true, Some(path)),
            Err(MediaError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_cancel_without_live_process() {
        let supervisor = ProcessSupervisor::new(SupervisorConfig::new(ToolCommand::new("true")));
        assert!(!supervisor.cancel().await);
        assert!(!supervisor.is_busy().await);
    }
}

#[cfg(all(test, unix))]
mod process_tests {
    use super::*;
    use crate::task::TaskEvent;
    use futures_util::StreamExt;
    use tempfile::TempDir;

    fn script(dir: &TempDir, name: &str, body: &str) -> ProcessSupervisor {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let command = ToolCommand::new("sh").with_args([path.to_string_lossy().to_string()]);
        ProcessSupervisor::new(
            SupervisorConfig::new(command)
                .with_grace_period(Duration::from_millis(300))
                .with_progress_interval(Duration::from_secs(10)),
        )
    }

    #[tokio::test]
    async fn test_successful_run_returns_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = script(
            &dir,
            "ok.sh",
            r#"echo "Processing: $1"
echo "Progress: 1/4"
echo "Progress: 2/4"
echo "Progress: 3/4"
echo "warming up" >&2
echo "Output saved to: ${1%.mp4}_up.mp4"
exit 0"#,
        );

        let run = supervisor.spawn("/uploads/ep-1.mp4").await.unwrap();
        let mut progress = Vec::new();
        let output = run.finish_with(|p| progress.push(p)).await.unwrap();

        assert_eq!(output, PathBuf::from("/uploads/ep-1_up.mp4"));
        // Throttled to one event per interval
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].percent, Some(25.0));
        assert!(!supervisor.is_busy().await);
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_keeps_draining() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = script(
            &dir,
            "bytes.sh",
            r#"printf 'bad \377 byte\n' >&2
printf 'frame \377 done\n'
i=0
while [ $i -lt 2000 ]; do
  echo "tile $i upscaled" >&2
  i=$((i+1))
done
echo "Output saved to: /tmp/out.mp4"
exit 0"#,
        );

        let output = supervisor.spawn("in.mp4").await.unwrap().finish().await;
        assert_eq!(output.unwrap(), PathBuf::from("/tmp/out.mp4"));
    }

    #[tokio::test]
    async fn test_json_marker_parser_run() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = script(
            &dir,
            "json.sh",
            r#"echo '{"event":"input","path":"'"$1"'"}'
echo '{"event":"progress","percent":50.0,"message":"half"}'
echo 'Output saved to: /ignored.mp4'
echo '{"event":"output","path":"/uploads/ep-1_up.mp4"}'
exit 0"#,
        )
        .with_parser(Arc::new(JsonMarkerParser));

        let mut progress = Vec::new();
        let output = supervisor
            .spawn("/uploads/ep-1.mp4")
            .await
            .unwrap()
            .finish_with(|p| progress.push(p))
            .await
            .unwrap();

        assert_eq!(output, PathBuf::from("/uploads/ep-1_up.mp4"));
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].percent, Some(50.0));
        assert_eq!(progress[0].message.as_deref(), Some("half"));
    }

    #[tokio::test]
    async fn test_success_without_marker_is_output_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = script(&dir, "quiet.sh", "echo \"Processing: $1\"\nexit 0");

        let err = supervisor.spawn("in.mp4").await.unwrap().finish().await.unwrap_err();
        assert!(matches!(err, MediaError::OutputNotFound));
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_code() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = script(&dir, "fail.sh", "echo 'CUDA error' >&2\nexit 3");

        let err = supervisor.spawn("in.mp4").await.unwrap().finish().await.unwrap_err();
        assert!(matches!(err, MediaError::ProcessExit { code: 3 }));
    }

    #[tokio::test]
    async fn test_second_spawn_is_rejected_while_live() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = script(&dir, "slow.sh", "exec sleep 30");

        let first = supervisor.spawn("a.mp4").await.unwrap();
        assert!(supervisor.is_busy().await);
        assert!(matches!(
            supervisor.spawn("b.mp4").await,
            Err(MediaError::Busy(_))
        ));

        supervisor.cancel().await;
        assert!(matches!(first.finish().await, Err(MediaError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_frees_supervisor_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = script(
            &dir,
            "stubborn.sh",
            "trap '' TERM\necho 'Progress: 0%'\nexec sleep 30",
        );

        let mut first = supervisor.spawn("a.mp4").await.unwrap();
        assert!(supervisor.current().await.is_some());

        // SIGTERM is ignored from here on
        assert!(matches!(first.next().await, Some(TaskEvent::Progress(_))));

        let started = Instant::now();
        assert!(supervisor.cancel().await);
        assert!(!supervisor.is_busy().await);

        // A new run starts without waiting for the grace period
        let second = supervisor.spawn("b.mp4").await.unwrap();
        assert!(started.elapsed() < supervisor.config().grace_period);

        // The stubborn child only goes away after escalation
        assert!(matches!(first.finish().await, Err(MediaError::Cancelled)));
        assert!(started.elapsed() >= supervisor.config().grace_period);

        // Releasing the first run must not clear the second run's handle
        assert!(supervisor.is_busy().await);

        second.cancel();
        assert!(matches!(second.finish().await, Err(MediaError::Cancelled)));
        assert!(!supervisor.is_busy().await);
    }
}
