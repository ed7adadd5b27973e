//! Shared data models for the episode HLS pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Job lifecycle records and their status machine
//! - Probed source metadata
//! - Quality tiers and the per-tier results of a transcode
//! - The pipeline request options and final result

pub mod job;
pub mod quality;
pub mod result;
pub mod source;

// Re-export common types
pub use job::{JobRecord, JobStatus, JobUpdate, TransitionError};
pub use quality::{ProcessedQuality, QualityTier, Resolution, ResolutionParseError};
pub use result::{ProcessingResult, QualityDescriptor, TranscodeOptions, DEFAULT_QUALITIES};
pub use source::SourceMetadata;
