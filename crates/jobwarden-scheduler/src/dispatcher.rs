//! Dispatcher: the tick loop that turns due jobs into runs.
//!
//! Each tick lists the store, schedules pending jobs, applies misfire and
//! coalesce rules to due jobs and hands claimed runs to a bounded worker
//! pool. A job id is claimed in the in-flight set before it is evaluated and
//! released only after its `Finished` event, so the same id never executes
//! twice at once, even when ticks overlap.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dashmap::DashSet;
use futures::FutureExt;
use tokio::sync::{watch, Notify, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::body::{panic_message, JobContext, JobRegistry};
use crate::clock::{Clock, SystemClock};
use crate::error::{JobError, SchedulerError, SchedulerResult};
use crate::events::{EventBus, JobEvent, RunOutcome};
use crate::job::{Job, JobState, RunRecord};
use crate::metrics::SchedulerMetrics;
use crate::store::JobStore;
use crate::trigger::{initial_run_time, plan_run};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Longest sleep between two scans.
    pub tick_interval: Duration,
    /// Maximum number of concurrently executing bodies.
    pub max_workers: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            max_workers: 4,
        }
    }
}

/// What one scan did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Jobs moved from pending to scheduled.
    pub scheduled: Vec<String>,
    /// Jobs whose run was handed to the worker pool.
    pub started: Vec<String>,
    /// Jobs whose due firing was dropped.
    pub misfired: Vec<String>,
    /// Earliest upcoming run among jobs left waiting.
    pub next_due: Option<DateTime<Utc>>,
}

impl TickReport {
    fn note_next(&mut self, at: Option<DateTime<Utc>>) {
        if let Some(at) = at {
            self.next_due = Some(self.next_due.map_or(at, |cur| cur.min(at)));
        }
    }
}

/// A run claimed by a tick, waiting for a worker.
struct Claim {
    job: Job,
    fire_time: DateTime<Utc>,
    next_run_time: Option<DateTime<Utc>>,
}

/// Everything a worker task needs, detached from the dispatcher.
#[derive(Clone)]
struct Worker {
    store: Arc<dyn JobStore>,
    registry: Arc<JobRegistry>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    tz: Tz,
    metrics: Arc<SchedulerMetrics>,
    in_flight: Arc<DashSet<String>>,
    permits: Arc<Semaphore>,
    run_finished: Arc<Notify>,
}

/// The job dispatcher.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    registry: Arc<JobRegistry>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    tz: Tz,
    config: DispatcherConfig,
    metrics: Arc<SchedulerMetrics>,
    in_flight: Arc<DashSet<String>>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    run_finished: Arc<Notify>,
    running: AtomicBool,
}

impl Dispatcher {
    /// Create a dispatcher with the default configuration, system clock and UTC.
    pub fn new(store: Arc<dyn JobStore>, registry: JobRegistry, bus: Arc<EventBus>) -> Self {
        let config = DispatcherConfig::default();
        Self {
            store,
            registry: Arc::new(registry),
            bus,
            clock: Arc::new(SystemClock),
            tz: Tz::UTC,
            permits: Arc::new(Semaphore::new(config.max_workers.max(1))),
            config,
            metrics: Arc::new(SchedulerMetrics::new()),
            in_flight: Arc::new(DashSet::new()),
            tracker: TaskTracker::new(),
            run_finished: Arc::new(Notify::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.permits = Arc::new(Semaphore::new(config.max_workers.max(1)));
        self.config = config;
        self
    }

    /// Set the time zone triggers are evaluated in.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    /// Set the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share a metrics instance (e.g. with the introspection job).
    pub fn with_metrics(mut self, metrics: Arc<SchedulerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<SchedulerMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Whether the tick loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of runs currently claimed or executing.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether a run of `id` is claimed or executing.
    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.contains(id)
    }

    /// Run one scan.
    ///
    /// Only a failure to list the store is returned; per-job failures are
    /// logged and the job is skipped until the next scan.
    pub async fn tick(&self) -> SchedulerResult<TickReport> {
        let jobs = self.store.list().await?;
        let now = self.clock.now();
        let mut report = TickReport::default();

        for job in jobs {
            match job.state {
                JobState::Paused | JobState::Running => continue,
                JobState::Pending | JobState::Scheduled => {}
            }

            // The in-flight slot doubles as a per-id lock while evaluating.
            if !self.in_flight.insert(job.id.clone()) {
                continue;
            }

            match self.evaluate(&job.id, now, &mut report).await {
                Ok(Some(claim)) => self.spawn(claim),
                Ok(None) => {
                    self.in_flight.remove(&job.id);
                }
                Err(e) => {
                    self.in_flight.remove(&job.id);
                    self.metrics.record_store_error();
                    error!("Failed to evaluate job '{}': {}", job.id, e);
                }
            }
        }

        self.metrics.record_tick();
        debug!(
            "Tick done: {} started, {} misfired, {} newly scheduled",
            report.started.len(),
            report.misfired.len(),
            report.scheduled.len()
        );
        Ok(report)
    }

    /// Decide what to do with one job. The caller holds its in-flight slot.
    async fn evaluate(
        &self,
        id: &str,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> SchedulerResult<Option<Claim>> {
        // Re-read under the slot: the listing may predate a run that just finished.
        let mut job = self.store.get(id).await?;

        match job.state {
            JobState::Paused | JobState::Running => return Ok(None),
            JobState::Pending => {
                let next = match job.next_run_time {
                    Some(at) => Some(at),
                    None => initial_run_time(&job.trigger, now, &self.tz)?,
                };
                self.store.set_next_run(id, next).await?;
                if !self
                    .store
                    .compare_and_set_state(id, JobState::Pending, JobState::Scheduled)
                    .await?
                {
                    return Ok(None);
                }
                match next {
                    Some(at) => info!(
                        "Scheduled job '{}' ({}), first run at {}",
                        id,
                        job.trigger,
                        at.with_timezone(&self.tz)
                    ),
                    None => warn!("Job '{}' ({}) will never fire", id, job.trigger),
                }
                job.next_run_time = next;
                job.state = JobState::Scheduled;
                report.scheduled.push(id.to_string());
            }
            JobState::Scheduled => {}
        }

        if job.next_run_time.is_none() {
            let next = initial_run_time(&job.trigger, now, &self.tz)?;
            if next.is_none() {
                return Ok(None);
            }
            self.store.set_next_run(id, next).await?;
            job.next_run_time = next;
        }

        let plan = plan_run(&job, now, &self.tz)?;

        if plan.is_misfire() {
            if let Some(missed) = job.next_run_time {
                warn!(
                    "Run of job '{}' scheduled at {} was missed by {}s; next run at {:?}",
                    id,
                    missed.with_timezone(&self.tz),
                    (now - missed).num_seconds(),
                    plan.next_run_time.map(|t| t.with_timezone(&self.tz))
                );
            }
            self.metrics.record_misfire();
            self.store.set_next_run(id, plan.next_run_time).await?;
            report.misfired.push(id.to_string());
            report.note_next(plan.next_run_time);
            return Ok(None);
        }

        let Some(fire_time) = plan.fire_time else {
            report.note_next(plan.next_run_time);
            return Ok(None);
        };

        if plan.skipped {
            warn!(
                "Job '{}': firings older than the grace period were dropped",
                id
            );
            self.metrics.record_misfire();
        }
        if plan.coalesced {
            debug!("Job '{}': missed firings coalesced into one run", id);
            self.metrics.record_coalesced();
        }

        if !self
            .store
            .compare_and_set_state(id, JobState::Scheduled, JobState::Running)
            .await?
        {
            debug!("Job '{}' changed state before it could be claimed", id);
            return Ok(None);
        }

        report.started.push(id.to_string());
        Ok(Some(Claim {
            job,
            fire_time,
            next_run_time: plan.next_run_time,
        }))
    }

    fn spawn(&self, claim: Claim) {
        let worker = self.worker();
        self.tracker.spawn(async move { worker.execute(claim).await });
    }

    fn worker(&self) -> Worker {
        Worker {
            store: self.store.clone(),
            registry: self.registry.clone(),
            bus: self.bus.clone(),
            clock: self.clock.clone(),
            tz: self.tz,
            metrics: self.metrics.clone(),
            in_flight: self.in_flight.clone(),
            permits: self.permits.clone(),
            run_finished: self.run_finished.clone(),
        }
    }

    /// Wait until every claimed run has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Run the tick loop until `cancel` turns true (or its sender is dropped),
    /// then wait for in-flight runs. Bodies are never cancelled.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> SchedulerResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(
            "Dispatcher started (tick interval: {:?}, max workers: {}, timezone: {})",
            self.config.tick_interval, self.config.max_workers, self.tz
        );
        self.metrics.mark_start();

        loop {
            if *cancel.borrow() {
                break;
            }

            let sleep_for = match self.tick().await {
                Ok(report) => self.sleep_until(report.next_due),
                Err(e) => {
                    self.metrics.record_store_error();
                    error!("Dispatcher tick failed: {}", e);
                    self.config.tick_interval
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.run_finished.notified() => {
                    debug!("Woken by a finished run");
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            "Dispatcher stopping, waiting for {} in-flight run(s)",
            self.in_flight_count()
        );
        self.wait_idle().await;
        self.running.store(false, Ordering::SeqCst);
        info!("Dispatcher stopped");
        Ok(())
    }

    fn sleep_until(&self, next_due: Option<DateTime<Utc>>) -> Duration {
        let cap = self.config.tick_interval;
        match next_due {
            Some(at) => (at - self.clock.now())
                .to_std()
                .map(|d| d.min(cap))
                .unwrap_or(Duration::ZERO),
            None => cap,
        }
    }
}

impl Worker {
    async fn execute(self, claim: Claim) {
        let Claim {
            job,
            fire_time,
            next_run_time,
        } = claim;
        let id = job.id.clone();

        // The semaphore is never closed.
        let _permit = self.permits.clone().acquire_owned().await.ok();

        // The job may have been paused while this run waited for a worker.
        // The claim is void then: the due time stays put and whoever paused
        // the job owns its state.
        match self.store.get(&id).await {
            Ok(current) if current.state != JobState::Running => {
                info!(
                    "Job '{}' is {} after waiting for a worker; run abandoned",
                    id, current.state
                );
                self.in_flight.remove(&id);
                self.run_finished.notify_one();
                return;
            }
            Ok(_) => {}
            Err(e) => warn!("Cannot re-check job '{}' before running: {}", id, e),
        }

        let started_at = self.clock.now();
        self.metrics.record_run_started();
        info!(
            "Running job '{}' (scheduled for {})",
            id,
            fire_time.with_timezone(&self.tz)
        );
        self.bus
            .publish(&JobEvent::started(&id, fire_time, started_at))
            .await;

        let ctx = JobContext {
            job_id: id.clone(),
            name: job.name.clone(),
            fire_time,
            started_at,
            tz: self.tz,
        };
        let result = self.invoke(&ctx).await;
        let finished_at = self.clock.now();

        let (record, outcome) = match &result {
            Ok(()) => {
                info!("Job '{}' completed", id);
                (RunRecord::success(fire_time, finished_at), RunOutcome::Ok)
            }
            Err(e) => {
                error!("Job '{}' failed: {}", id, e);
                (
                    RunRecord::failure(fire_time, finished_at, e.to_string()),
                    RunOutcome::Failed(e.to_string()),
                )
            }
        };
        self.metrics.record_run_finished(result.is_err());

        if let Err(e) = self.store.record_run(&id, &record).await {
            error!("Failed to record run of job '{}': {}", id, e);
        }
        if let Err(e) = self.store.set_next_run(&id, next_run_time).await {
            error!("Failed to store next run time of job '{}': {}", id, e);
        }
        // A pause or resume that arrived mid-run wins over the finish transition.
        match self
            .store
            .compare_and_set_state(&id, JobState::Running, JobState::Scheduled)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!("Job '{}' changed state while running; keeping it", id),
            Err(e) => error!("Failed to reschedule job '{}': {}", id, e),
        }

        self.bus
            .publish(&JobEvent::finished(&id, fire_time, self.clock.now(), outcome))
            .await;

        self.in_flight.remove(&id);
        self.run_finished.notify_one();
    }

    async fn invoke(&self, ctx: &JobContext) -> Result<(), JobError> {
        let Some(body) = self.registry.get(&ctx.job_id) else {
            return Err(JobError::MissingBody(ctx.job_id.clone()));
        };
        match AssertUnwindSafe(body.run(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
