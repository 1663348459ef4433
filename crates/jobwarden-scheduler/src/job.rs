//! Job record and state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::trigger::Trigger;

/// Job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Registered, no next run time computed yet.
    Pending,
    /// Waiting for its next run time.
    Scheduled,
    /// A run is in progress.
    Running,
    /// Suspended; never evaluated until resumed.
    Paused,
}

impl Default for JobState {
    fn default() -> Self {
        JobState::Pending
    }
}

impl JobState {
    /// Stable lowercase name, used as the persisted representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Scheduled => "scheduled",
            JobState::Running => "running",
            JobState::Paused => "paused",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "scheduled" => Ok(JobState::Scheduled),
            "running" => Ok(JobState::Running),
            "paused" => Ok(JobState::Paused),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

/// A persisted job definition plus its scheduling bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique, stable job id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// When the job fires.
    pub trigger: Trigger,
    /// Collapse accumulated missed firings into a single run.
    pub coalesce: bool,
    /// Maximum lateness of a firing before it is dropped; `None` = unlimited.
    pub misfire_grace_secs: Option<u64>,
    /// Next scheduled run; `None` until first scheduled.
    pub next_run_time: Option<DateTime<Utc>>,
    /// Current state.
    pub state: JobState,
    /// Scheduled time the last run was fired for.
    pub last_fire_time: Option<DateTime<Utc>>,
    /// Wall-clock time the last run finished.
    pub last_finished_at: Option<DateTime<Utc>>,
    /// Number of completed runs (successful or not).
    pub run_count: u64,
    /// Number of failed runs.
    pub failure_count: u64,
    /// Error message of the last run, if it failed.
    pub last_error: Option<String>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(id: impl Into<String>, trigger: Trigger) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            trigger,
            coalesce: false,
            misfire_grace_secs: Some(1),
            next_run_time: None,
            state: JobState::Pending,
            last_fire_time: None,
            last_finished_at: None,
            run_count: 0,
            failure_count: 0,
            last_error: None,
        }
    }

    /// Set a display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the coalesce policy.
    pub fn with_coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    /// Set the misfire grace period in seconds (`None` = unlimited).
    pub fn with_misfire_grace_secs(mut self, secs: Option<u64>) -> Self {
        self.misfire_grace_secs = secs;
        self
    }

    /// Set an explicit first run time.
    pub fn with_next_run_time(mut self, at: DateTime<Utc>) -> Self {
        self.next_run_time = Some(at);
        self
    }

    /// Misfire grace as a duration. Values too large to represent count as unlimited.
    pub fn misfire_grace(&self) -> Option<Duration> {
        self.misfire_grace_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
    }

    /// Whether the job is still waiting for its first schedule.
    pub fn is_pending(&self) -> bool {
        self.state == JobState::Pending || self.next_run_time.is_none()
    }

    /// Whether the configurable part of two records is the same.
    pub fn same_definition(&self, other: &Job) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.trigger == other.trigger
            && self.coalesce == other.coalesce
            && self.misfire_grace_secs == other.misfire_grace_secs
    }

    /// Apply the bookkeeping of a finished run.
    pub fn apply_run(&mut self, record: &RunRecord) {
        self.last_fire_time = Some(record.fire_time);
        self.last_finished_at = Some(record.finished_at);
        self.run_count += 1;
        match &record.error {
            Some(error) => {
                self.failure_count += 1;
                self.last_error = Some(error.clone());
            }
            None => self.last_error = None,
        }
    }
}

/// Outcome of one run, as recorded in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Scheduled time the run was fired for.
    pub fire_time: DateTime<Utc>,
    /// When the body completed.
    pub finished_at: DateTime<Utc>,
    /// Failure message, if the body failed.
    pub error: Option<String>,
}

impl RunRecord {
    /// A successful run.
    pub fn success(fire_time: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        Self {
            fire_time,
            finished_at,
            error: None,
        }
    }

    /// A failed run.
    pub fn failure(
        fire_time: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            fire_time,
            finished_at,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
