//! FFmpeg and upscaler process plumbing for HLS packaging.
//!
//! This crate provides:
//! - Source probing through `ffprobe`
//! - Quality tier planning against the source resolution
//! - Segmented HLS encoding per tier with progress parsed from `-progress pipe:2`
//! - Master playlist composition
//! - Supervision of the long-running upscale subprocess, with cancellation
//!
//! Long-running operations return a [`TaskStream`]: a finite stream of
//! progress events that ends in exactly one result.

pub mod command;
pub mod error;
mod lines;
pub mod planner;
pub mod playlist;
pub mod probe;
pub mod progress;
pub mod supervisor;
pub mod task;
pub mod tools;
pub mod transcode;

pub use command::{FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use planner::{plan_tier, plan_tiers, TierPreset, TIER_CATALOG};
pub use playlist::{compose_master, write_master, MASTER_PLAYLIST_NAME};
pub use probe::probe_source;
pub use progress::{FfmpegProgress, ProgressParser};
pub use supervisor::{
    JsonMarkerParser, LineMarkerParser, Marker, MarkerParser, ProcessSupervisor,
    SupervisedProcess, SupervisedRun, SupervisorConfig,
};
pub use task::{TaskEvent, TaskProgress, TaskStream};
pub use tokio_util::sync::CancellationToken;
pub use tools::{MediaTools, ToolCommand};
pub use transcode::{HlsSettings, TranscodeEngine, TIER_PLAYLIST_NAME};
