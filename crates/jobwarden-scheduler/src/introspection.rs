//! Operator-facing job listing and the informational job.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use tracing::info;

use crate::body::{JobBody, JobContext};
use crate::error::{JobError, StoreResult};
use crate::job::JobState;
use crate::metrics::{MetricsSnapshot, SchedulerMetrics};
use crate::store::JobStore;

/// One line of the job listing.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub id: String,
    pub name: String,
    pub trigger: String,
    pub state: JobState,
    /// Next run in the scheduler time zone.
    pub next_run: Option<DateTime<Tz>>,
    pub run_count: u64,
    pub failure_count: u64,
    pub last_error: Option<String>,
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (trigger: {}, {}", self.id, self.trigger, self.state)?;
        match &self.next_run {
            Some(at) => write!(f, ", next run at: {})", at.format("%Y-%m-%d %H:%M:%S %Z"))?,
            None => f.write_str(", pending (no next run yet))")?,
        }
        if self.run_count > 0 {
            write!(f, " runs={} failures={}", self.run_count, self.failure_count)?;
        }
        if let Some(error) = &self.last_error {
            write!(f, " last error: {}", error)?;
        }
        Ok(())
    }
}

/// Summaries of every stored job, in store listing order.
pub async fn describe_jobs(store: &dyn JobStore, tz: &Tz) -> StoreResult<Vec<JobSummary>> {
    Ok(store
        .list()
        .await?
        .into_iter()
        .map(|job| JobSummary {
            trigger: job.trigger.to_string(),
            next_run: job.next_run_time.map(|t| t.with_timezone(tz)),
            id: job.id,
            name: job.name,
            state: job.state,
            run_count: job.run_count,
            failure_count: job.failure_count,
            last_error: job.last_error,
        })
        .collect())
}

/// Render the listing as report lines.
pub fn render_report(jobs: &[JobSummary], metrics: Option<&MetricsSnapshot>) -> Vec<String> {
    let mut lines = Vec::with_capacity(jobs.len() + 2);
    lines.push(format!("{} job(s) scheduled", jobs.len()));
    lines.extend(jobs.iter().map(|job| format!("  {}", job)));
    if let Some(m) = metrics {
        lines.push(format!(
            "ticks={} runs={} failures={} misfires={} in_flight={}",
            m.ticks, m.runs_finished, m.failures, m.misfires, m.in_flight
        ));
    }
    lines
}

/// Body of the built-in `info` job: logs the job listing.
pub struct InfoJob {
    store: Arc<dyn JobStore>,
    metrics: Option<Arc<SchedulerMetrics>>,
}

impl InfoJob {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<SchedulerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the report at this moment.
    pub async fn report(&self, tz: &Tz) -> StoreResult<Vec<String>> {
        let jobs = describe_jobs(self.store.as_ref(), tz).await?;
        let snapshot = self.metrics.as_ref().map(|m| m.snapshot());
        Ok(render_report(&jobs, snapshot.as_ref()))
    }
}

#[async_trait]
impl JobBody for InfoJob {
    async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        let lines = self
            .report(&ctx.tz)
            .await
            .map_err(|e| JobError::failed(format!("cannot list jobs: {}", e)))?;
        for line in lines {
            info!("{}", line);
        }
        Ok(())
    }
}
