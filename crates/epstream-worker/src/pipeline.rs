//! Episode HLS pipeline.
//!
//! Probe → plan → encode each tier → master playlist, with every step
//! mirrored into the [`JobRegistry`].

use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use epstream_media::{
    plan_tiers, probe_source, write_master, MediaError, ProcessSupervisor, TaskEvent,
    TranscodeEngine, MASTER_PLAYLIST_NAME,
};
use epstream_models::{
    JobStatus, JobUpdate, ProcessedQuality, ProcessingResult, QualityDescriptor, QualityTier,
    SourceMetadata, TranscodeOptions,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::registry::JobRegistry;

/// Progress reported once the probe starts.
pub const ANALYZING_PROGRESS: u8 = 5;
/// Progress at which the first tier starts encoding.
pub const CONVERTING_START: u8 = 20;
/// Share of the progress bar spread over all tiers.
pub const CONVERTING_SPAN: u8 = 60;
/// Progress reported while the master playlist is written.
pub const COMPOSING_PROGRESS: u8 = 90;

/// Overall progress for tier `index` of `count` at `tier_percent` done.
pub fn tier_progress(index: usize, count: usize, tier_percent: f64) -> u8 {
    let count = count.max(1) as f64;
    let span = f64::from(CONVERTING_SPAN);
    let value = f64::from(CONVERTING_START)
        + span * index as f64 / count
        + tier_percent.clamp(0.0, 100.0) * span / count / 100.0;
    value.floor().min(f64::from(CONVERTING_START + CONVERTING_SPAN)) as u8
}

/// Reject ids that would escape the storage root.
pub fn validate_episode_id(episode_id: &str) -> WorkerResult<()> {
    let id = episode_id.trim();
    if id.is_empty() || id != episode_id {
        return Err(WorkerError::invalid_request("episode id must be non-empty and untrimmed"));
    }
    if id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(WorkerError::invalid_request(format!(
            "episode id {:?} is not a valid directory name",
            episode_id
        )));
    }
    Ok(())
}

/// Turns one uploaded episode into an HLS package.
#[derive(Clone)]
pub struct HlsPipeline {
    config: Arc<WorkerConfig>,
    registry: JobRegistry,
    engine: TranscodeEngine,
    supervisor: ProcessSupervisor,
}

impl HlsPipeline {
    pub fn new(config: WorkerConfig, registry: JobRegistry) -> Self {
        let engine = TranscodeEngine::new(&config.media_tools());
        let supervisor = ProcessSupervisor::new(config.supervisor_config());
        Self {
            config: Arc::new(config),
            registry,
            engine,
            supervisor,
        }
    }

    /// Replace the upscale supervisor (e.g. to use a different marker parser).
    pub fn with_supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Package `input` as HLS under `<storage_root>/hls/<episode_id>/`.
    pub async fn process(
        &self,
        episode_id: &str,
        input: impl AsRef<Path>,
        options: &TranscodeOptions,
    ) -> WorkerResult<ProcessingResult> {
        self.execute(episode_id, input.as_ref(), options, false).await
    }

    /// Run the upscaler on `input`, then package its output.
    pub async fn upscale_then_process(
        &self,
        episode_id: &str,
        input: impl AsRef<Path>,
        options: &TranscodeOptions,
    ) -> WorkerResult<ProcessingResult> {
        self.execute(episode_id, input.as_ref(), options, true).await
    }

    /// Mark a job failed from outside the pipeline (timeouts, shutdown).
    pub async fn fail_job(&self, episode_id: &str, error: &WorkerError) {
        if let Err(e) = self
            .registry
            .update(episode_id, JobUpdate::failed(error.to_string()))
            .await
        {
            tracing::debug!(episode_id, "Job not marked failed: {}", e);
            return;
        }
        metrics::record_job_failed(error_kind(error));
    }

    async fn execute(
        &self,
        episode_id: &str,
        input: &Path,
        options: &TranscodeOptions,
        upscale: bool,
    ) -> WorkerResult<ProcessingResult> {
        validate_episode_id(episode_id)?;
        self.registry.start(episode_id).await?;
        metrics::record_job_started();

        let operation = if upscale { "upscale_hls" } else { "hls_transcode" };
        let logger = JobLogger::new(episode_id, operation);
        logger.started(format_args!("input={}", input.display()));
        let started = Instant::now();

        let outcome = async {
            let source_path = if upscale {
                self.run_upscale(episode_id, input, &logger).await?
            } else {
                input.to_path_buf()
            };
            self.run(episode_id, &source_path, options, &logger, started).await
        }
        .instrument(logger.span())
        .await;

        match outcome {
            Ok(result) => {
                self.registry
                    .update(episode_id, JobUpdate::completed())
                    .await?;
                metrics::record_job_completed(started.elapsed().as_secs_f64());
                logger.finished(format_args!(
                    "{} tiers in {} ms",
                    result.qualities.len(),
                    result.processing_time
                ));
                Ok(result)
            }
            Err(e) => {
                logger.failed(&e);
                self.fail_job(episode_id, &e).await;
                Err(e)
            }
        }
    }

    async fn run_upscale(
        &self,
        episode_id: &str,
        input: &Path,
        logger: &JobLogger,
    ) -> WorkerResult<PathBuf> {
        self.registry
            .update(episode_id, JobUpdate::default().with_step("Upscaling source video"))
            .await?;

        let started = Instant::now();
        let mut run = self.supervisor.spawn(input).await?;

        let result = loop {
            match run.next().await {
                Some(TaskEvent::Progress(p)) => {
                    let step = match p.percent {
                        Some(pct) => format!("Upscaling source video ({:.0}%)", pct),
                        None => "Upscaling source video".to_string(),
                    };
                    self.registry
                        .update(episode_id, JobUpdate::default().with_step(step))
                        .await?;
                }
                Some(TaskEvent::Finished(result)) => break result,
                None => break Err(MediaError::internal("upscale ended without a result")),
            }
        };

        let cancelled = result.as_ref().err().is_some_and(MediaError::is_cancelled);
        metrics::record_upscale(started.elapsed().as_secs_f64(), cancelled);

        let output = result?;
        logger.step(format_args!("upscaled source at {}", output.display()));
        Ok(output)
    }

    async fn run(
        &self,
        episode_id: &str,
        input: &Path,
        options: &TranscodeOptions,
        logger: &JobLogger,
        started: Instant,
    ) -> WorkerResult<ProcessingResult> {
        self.registry
            .update(
                episode_id,
                JobUpdate::status(JobStatus::Analyzing)
                    .with_progress(ANALYZING_PROGRESS)
                    .with_step("Analyzing source video"),
            )
            .await?;

        let source = probe_source(&self.config.ffprobe, input).await?;
        logger.step(format_args!(
            "source {}x{} {} {:.1}s @ {:.2} fps",
            source.width,
            source.height,
            source.codec_name,
            source.duration_seconds,
            source.frames_per_second
        ));
        if source.duration().is_zero() {
            logger.warning("source duration unknown, tier progress will stay at its start");
        }

        let tiers = plan_tiers(&options.effective_qualities(), &source);
        let output_dir = self.config.episode_dir(episode_id);
        tokio::fs::create_dir_all(&output_dir).await?;

        let count = tiers.len();
        let mut processed = Vec::with_capacity(count);

        for (index, tier) in tiers.iter().enumerate() {
            self.registry
                .update(
                    episode_id,
                    JobUpdate::status(JobStatus::Converting)
                        .with_progress(tier_progress(index, count, 0.0))
                        .with_step(format!("Converting to {}", tier.name)),
                )
                .await?;

            let tier_started = Instant::now();
            let quality = self
                .encode_tier(episode_id, input, &output_dir, tier, &source, index, count)
                .await?;
            metrics::record_tier_encoded(&tier.name, tier_started.elapsed().as_secs_f64());
            logger.step(format_args!("{} done at {}", tier.name, tier.resolution));

            processed.push(quality);
        }

        self.registry
            .update(
                episode_id,
                JobUpdate::status(JobStatus::ComposingPlaylist)
                    .with_progress(COMPOSING_PROGRESS)
                    .with_step("Creating master playlist"),
            )
            .await?;
        write_master(&output_dir, &processed).await?;

        Ok(build_result(
            episode_id,
            &processed,
            &source,
            started.elapsed().as_millis() as u64,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    async fn encode_tier(
        &self,
        episode_id: &str,
        input: &Path,
        output_dir: &Path,
        tier: &QualityTier,
        source: &SourceMetadata,
        index: usize,
        count: usize,
    ) -> WorkerResult<ProcessedQuality> {
        let mut stream = self.engine.transcode(input, output_dir, tier, source);
        let mut last = tier_progress(index, count, 0.0);

        loop {
            match stream.next().await {
                Some(TaskEvent::Progress(p)) => {
                    let Some(pct) = p.percent else { continue };
                    let overall = tier_progress(index, count, pct);
                    if overall > last {
                        last = overall;
                        self.registry
                            .update(episode_id, JobUpdate::progress(overall))
                            .await?;
                    }
                }
                Some(TaskEvent::Finished(result)) => return Ok(result?),
                None => return Err(MediaError::internal("transcode ended without a result").into()),
            }
        }
    }
}

fn build_result(
    episode_id: &str,
    processed: &[ProcessedQuality],
    source: &SourceMetadata,
    processing_time: u64,
) -> ProcessingResult {
    let prefix = format!("hls/{}", episode_id);

    ProcessingResult {
        episode_id: episode_id.to_string(),
        hls_path: format!("{}/{}", prefix, MASTER_PLAYLIST_NAME),
        qualities: processed
            .iter()
            .map(|q| QualityDescriptor {
                quality: q.name.clone(),
                resolution: q.resolution.to_string(),
                bitrate: q.video_bitrate_kbps,
                file_path: format!("{}/{}", prefix, q.playlist_path),
            })
            .collect(),
        duration: source.duration_seconds,
        processing_time,
    }
}

/// Short label for the failed-jobs metric.
fn error_kind(error: &WorkerError) -> &'static str {
    match error {
        WorkerError::Media(e) => match e {
            MediaError::NotFound(_) => "not_found",
            MediaError::Analysis(_) => "analysis",
            MediaError::Conversion { .. } | MediaError::FfmpegFailed { .. } => "conversion",
            MediaError::PlaylistWrite { .. } => "playlist",
            MediaError::Cancelled => "cancelled",
            MediaError::OutputNotFound | MediaError::ProcessExit { .. } | MediaError::Busy(_) => {
                "upscale"
            }
            _ => "media",
        },
        WorkerError::Registry(_) => "registry",
        WorkerError::Timeout(_) => "timeout",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epstream_models::Resolution;

    #[test]
    fn test_tier_progress() {
        assert_eq!(tier_progress(0, 2, 0.0), 20);
        assert_eq!(tier_progress(0, 2, 50.0), 35);
        assert_eq!(tier_progress(0, 2, 100.0), 50);
        assert_eq!(tier_progress(1, 2, 0.0), 50);
        assert_eq!(tier_progress(1, 2, 100.0), 80);
        assert_eq!(tier_progress(0, 1, 150.0), 80);
        assert_eq!(tier_progress(0, 0, 0.0), 20);
    }

    #[test]
    fn test_tier_progress_is_monotonic() {
        let count = 3;
        let mut last = 0;
        for index in 0..count {
            for pct in (0..=100).step_by(5) {
                let value = tier_progress(index, count, pct as f64);
                assert!(value >= last);
                last = value;
            }
        }
        assert!(last < COMPOSING_PROGRESS);
    }

    #[test]
    fn test_validate_episode_id() {
        assert!(validate_episode_id("ep-2024-001").is_ok());
        for bad in ["", " ", "..", ".", "a/b", "a\\b", " ep"] {
            assert!(validate_episode_id(bad).is_err(), "{:?}", bad);
        }
    }

    #[test]
    fn test_build_result_paths() {
        let processed = vec![ProcessedQuality {
            name: "480p".into(),
            resolution: Resolution::new(640, 360),
            video_bitrate_kbps: 1000,
            playlist_path: "480p/playlist.m3u8".into(),
        }];
        let source = SourceMetadata {
            duration_seconds: 12.5,
            width: 640,
            height: 360,
            codec_name: "h264".into(),
            bitrate_bps: 0,
            frames_per_second: 30.0,
        };

        let result = build_result("ep-1", &processed, &source, 42);
        assert_eq!(result.hls_path, "hls/ep-1/master.m3u8");
        assert_eq!(result.qualities[0].file_path, "hls/ep-1/480p/playlist.m3u8");
        assert_eq!(result.qualities[0].resolution, "640x360");
        assert_eq!(result.duration, 12.5);
        assert_eq!(result.processing_time, 42);
    }

    #[tokio::test]
    async fn test_invalid_id_creates_no_record() {
        let registry = JobRegistry::new();
        let pipeline = HlsPipeline::new(WorkerConfig::default(), registry.clone());

        let err = pipeline
            .process("../escape", "in.mp4", &TranscodeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidRequest(_)));
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_input_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new();
        let config = WorkerConfig {
            storage_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let pipeline = HlsPipeline::new(config, registry.clone());

        let missing = dir.path().join("missing.mp4");
        let err = pipeline
            .process("ep-1", &missing, &TranscodeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err.as_media(), Some(MediaError::NotFound(_))));

        let record = registry.get("ep-1").await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.progress, ANALYZING_PROGRESS);
        assert!(record.error.unwrap().contains("missing.mp4"));
    }
}
