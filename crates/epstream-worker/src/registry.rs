//! In-memory job registry.
//!
//! One [`JobRecord`] per episode id. The registry is an explicit, cloneable
//! object; every accepted change is broadcast to subscribers.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use epstream_models::{JobRecord, JobUpdate};

use crate::error::RegistryError;
use crate::metrics;

const EVENT_CAPACITY: usize = 256;

/// Shared store of per-episode job records.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, JobRecord>>>,
    events: broadcast::Sender<JobRecord>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Create a queued record for `id`.
    ///
    /// A finished record under the same id is replaced; a running one is not.
    pub async fn start(&self, id: &str) -> Result<JobRecord, RegistryError> {
        let mut jobs = self.jobs.write().await;

        if let Some(existing) = jobs.get(id) {
            if !existing.is_terminal() {
                return Err(RegistryError::AlreadyActive(id.to_string()));
            }
        }

        let record = JobRecord::new(id);
        jobs.insert(id.to_string(), record.clone());
        metrics::set_active_jobs(active_count(&jobs));
        drop(jobs);

        debug!(episode_id = id, "Job registered");
        let _ = self.events.send(record.clone());
        Ok(record)
    }

    /// Merge `update` into the record for `id`.
    pub async fn update(&self, id: &str, update: JobUpdate) -> Result<JobRecord, RegistryError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        record
            .apply(update)
            .map_err(|source| RegistryError::Transition {
                id: id.to_string(),
                source,
            })?;

        let snapshot = record.clone();
        if snapshot.is_terminal() {
            metrics::set_active_jobs(active_count(&jobs));
        }
        drop(jobs);

        debug!(
            episode_id = id,
            status = %snapshot.status,
            progress = snapshot.progress,
            step = %snapshot.current_step,
            "Job updated"
        );
        let _ = self.events.send(snapshot.clone());
        Ok(snapshot)
    }

    pub async fn get(&self, id: &str) -> Option<JobRecord> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Remove and return the record for `id`.
    pub async fn clear(&self, id: &str) -> Option<JobRecord> {
        let mut jobs = self.jobs.write().await;
        let removed = jobs.remove(id)?;
        if !removed.is_terminal() {
            metrics::set_active_jobs(active_count(&jobs));
        }
        Some(removed)
    }

    /// All records, oldest first.
    pub async fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<_> = self.jobs.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Receive a snapshot after every accepted change.
    pub fn subscribe(&self) -> broadcast::Receiver<JobRecord> {
        self.events.subscribe()
    }
}

fn active_count(jobs: &HashMap<String, JobRecord>) -> usize {
    jobs.values().filter(|r| !r.is_terminal()).count()
}
