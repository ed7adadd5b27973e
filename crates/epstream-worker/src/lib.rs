//! Episode HLS packaging worker.
//!
//! This crate provides:
//! - The [`HlsPipeline`] entry point: probe, plan, encode, compose
//! - An in-memory [`JobRegistry`] of per-episode progress
//! - Environment-driven configuration, job logging and metrics

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod registry;

pub use config::WorkerConfig;
pub use error::{RegistryError, WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use pipeline::HlsPipeline;
pub use registry::JobRegistry;
