//! Job record store.
//!
//! The store is the only owner of persisted job state. The dispatcher and
//! the dependency coordinator mutate jobs exclusively through this trait, so
//! a restarted process can resume from the store contents alone.

mod memory;
mod schema;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::job::{Job, JobState, RunRecord};

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

/// Outcome of [`JobStore::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The job was new and has been stored.
    Inserted,
    /// A job with this id was already present; nothing was written.
    AlreadyExists,
}

/// Persistence for job records.
///
/// Every mutation is durable before the call returns. Mutations of the same
/// job id are serialized by the implementation.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job unless its id is already present.
    async fn register(&self, job: &Job) -> StoreResult<Registration>;

    /// Load a job by id.
    async fn get(&self, id: &str) -> StoreResult<Job>;

    /// Unconditionally set a job's state.
    async fn update_state(&self, id: &str, state: JobState) -> StoreResult<()>;

    /// Set a job's state only if it currently is `expected`.
    /// Returns whether the transition happened.
    async fn compare_and_set_state(
        &self,
        id: &str,
        expected: JobState,
        new: JobState,
    ) -> StoreResult<bool>;

    /// Set or clear a job's next run time.
    async fn set_next_run(&self, id: &str, at: Option<DateTime<Utc>>) -> StoreResult<()>;

    /// Record the bookkeeping of a finished run.
    async fn record_run(&self, id: &str, record: &RunRecord) -> StoreResult<()>;

    /// Overwrite the definition (name, trigger, coalesce, grace) of an
    /// existing job, keeping its state and bookkeeping.
    async fn replace_definition(&self, job: &Job) -> StoreResult<()>;

    /// All jobs, ordered by next run time ascending with unscheduled jobs last.
    async fn list(&self) -> StoreResult<Vec<Job>>;
}

/// Open a store from a connection URI.
///
/// Accepted forms: `memory://`, `sqlite::memory:`, `sqlite://<path>` and a
/// bare filesystem path. `~` is expanded in paths.
pub async fn open_store(uri: &str) -> StoreResult<Arc<dyn JobStore>> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(StoreError::InvalidUri(uri.to_string()));
    }

    if uri == "memory://" || uri == "memory" {
        info!("Using in-memory job store (jobs do not survive restarts)");
        return Ok(Arc::new(MemoryJobStore::new()));
    }

    if uri == "sqlite::memory:" {
        return Ok(Arc::new(SqliteJobStore::in_memory().await?));
    }

    let path = match uri.strip_prefix("sqlite://") {
        Some(path) => path,
        None if uri.contains("://") => return Err(StoreError::InvalidUri(uri.to_string())),
        None => uri,
    };
    let path = shellexpand::tilde(path).to_string();

    info!("Opening job store at {}", path);
    Ok(Arc::new(SqliteJobStore::open(path).await?))
}

/// Order used by [`JobStore::list`].
pub(crate) fn sort_for_listing(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| match (a.next_run_time, b.next_run_time) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.id.cmp(&b.id)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    });
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
