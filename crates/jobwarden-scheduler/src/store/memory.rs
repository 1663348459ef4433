//! In-memory job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{sort_for_listing, JobStore, Registration};
use crate::error::{StoreError, StoreResult};
use crate::job::{Job, JobState, RunRecord};

/// Job store kept in process memory. Nothing survives a restart; used for
/// tests and for deployments that opt out of persistence.
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Remove a job. Normal operation never deletes jobs; this exists for
    /// tests that simulate a partially rolled out job set.
    pub fn remove(&self, id: &str) -> Option<Job> {
        self.jobs.lock().remove(id)
    }

    fn with_job<T>(&self, id: &str, f: impl FnOnce(&mut Job) -> T) -> StoreResult<T> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(f(job))
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn register(&self, job: &Job) -> StoreResult<Registration> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.id) {
            return Ok(Registration::AlreadyExists);
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(Registration::Inserted)
    }

    async fn get(&self, id: &str) -> StoreResult<Job> {
        self.jobs
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update_state(&self, id: &str, state: JobState) -> StoreResult<()> {
        self.with_job(id, |job| job.state = state)
    }

    async fn compare_and_set_state(
        &self,
        id: &str,
        expected: JobState,
        new: JobState,
    ) -> StoreResult<bool> {
        self.with_job(id, |job| {
            if job.state == expected {
                job.state = new;
                true
            } else {
                false
            }
        })
    }

    async fn set_next_run(&self, id: &str, at: Option<DateTime<Utc>>) -> StoreResult<()> {
        self.with_job(id, |job| job.next_run_time = at)
    }

    async fn record_run(&self, id: &str, record: &RunRecord) -> StoreResult<()> {
        self.with_job(id, |job| job.apply_run(record))
    }

    async fn replace_definition(&self, job: &Job) -> StoreResult<()> {
        self.with_job(&job.id, |stored| {
            stored.name = job.name.clone();
            stored.trigger = job.trigger.clone();
            stored.coalesce = job.coalesce;
            stored.misfire_grace_secs = job.misfire_grace_secs;
        })
    }

    async fn list(&self) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.lock().values().cloned().collect();
        sort_for_listing(&mut jobs);
        Ok(jobs)
    }
}
