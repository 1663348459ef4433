//! Startup registration and recovery.
//!
//! Runs once per process before the tick loop: registers the configured jobs
//! without duplicating records from a previous run, repairs state left behind
//! by a crash, attaches the dependency coordinator and forces the primary job
//! to run now when its dataset is stale.

use std::sync::Arc;

use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::body::FreshnessCheck;
use crate::clock::{Clock, SystemClock};
use crate::coordinator::{DependencyCoordinator, DependencyRule};
use crate::error::{SchedulerResult, StoreError};
use crate::events::EventBus;
use crate::job::{Job, JobState};
use crate::store::{JobStore, Registration};
use crate::trigger::initial_run_time;

/// A job to register at startup.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job: Job,
    /// Refresh the stored definition when it differs from this one.
    pub replace_existing: bool,
    /// Make the first run happen at registration time.
    pub run_immediately: bool,
}

impl JobSpec {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            replace_existing: false,
            run_immediately: false,
        }
    }

    pub fn replace_existing(mut self, replace: bool) -> Self {
        self.replace_existing = replace;
        self
    }

    pub fn run_immediately(mut self, now: bool) -> Self {
        self.run_immediately = now;
        self
    }
}

/// What bootstrap did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Jobs newly inserted.
    pub inserted: Vec<String>,
    /// Jobs already present from a previous run.
    pub existing: Vec<String>,
    /// Existing jobs whose definition was refreshed.
    pub replaced: Vec<String>,
    /// Jobs found `Running` and moved back to `Scheduled`.
    pub recovered: Vec<String>,
    /// Dependents found paused with no primary running, resumed.
    pub resumed: Vec<String>,
    /// The primary was forced to run now by the freshness check.
    pub forced_primary: bool,
}

impl BootstrapReport {
    /// Every configured job was already in the store.
    pub fn prior_run_detected(&self) -> bool {
        self.inserted.is_empty() && !self.existing.is_empty()
    }
}

/// Startup sequence.
pub struct Bootstrap {
    store: Arc<dyn JobStore>,
    bus: Arc<EventBus>,
    specs: Vec<JobSpec>,
    rule: Option<DependencyRule>,
    freshness: Option<Arc<dyn FreshnessCheck>>,
    clock: Arc<dyn Clock>,
    tz: Tz,
}

impl Bootstrap {
    pub fn new(store: Arc<dyn JobStore>, bus: Arc<EventBus>, specs: Vec<JobSpec>) -> Self {
        Self {
            store,
            bus,
            specs,
            rule: None,
            freshness: None,
            clock: Arc::new(SystemClock),
            tz: Tz::UTC,
        }
    }

    pub fn with_dependency(mut self, rule: DependencyRule) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn with_freshness(mut self, check: Arc<dyn FreshnessCheck>) -> Self {
        self.freshness = Some(check);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Time zone used to place the first firing of a replaced cron trigger.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    /// Run the startup sequence. Only store and trigger errors are fatal.
    pub async fn run(&self) -> SchedulerResult<BootstrapReport> {
        let mut report = BootstrapReport::default();

        self.register_jobs(&mut report).await?;
        if report.prior_run_detected() {
            info!(
                "All {} configured job(s) already registered, resuming from the store",
                report.existing.len()
            );
        }

        self.recover(&mut report).await?;

        if let Some(rule) = &self.rule {
            Arc::new(DependencyCoordinator::new(rule.clone(), self.store.clone()))
                .attach(&self.bus);
        }

        self.check_freshness(&mut report).await?;

        info!(
            "Bootstrap complete: {} inserted, {} existing, {} replaced, {} recovered",
            report.inserted.len(),
            report.existing.len(),
            report.replaced.len(),
            report.recovered.len()
        );
        Ok(report)
    }

    async fn register_jobs(&self, report: &mut BootstrapReport) -> SchedulerResult<()> {
        let now = self.clock.now();

        for spec in &self.specs {
            spec.job.trigger.validate()?;

            let mut job = spec.job.clone();
            if spec.run_immediately {
                job.next_run_time = Some(now);
            }

            match self.store.register(&job).await? {
                Registration::Inserted => {
                    info!("Registered job '{}' ({})", job.id, job.trigger);
                    report.inserted.push(job.id.clone());
                }
                Registration::AlreadyExists => {
                    debug!("Job '{}' already registered", job.id);
                    report.existing.push(job.id.clone());

                    if spec.replace_existing {
                        let stored = self.store.get(&job.id).await?;
                        if !stored.same_definition(&job) {
                            self.store.replace_definition(&job).await?;
                            info!("Replaced definition of job '{}' ({})", job.id, job.trigger);
                            // The stored next run belongs to the old trigger.
                            if stored.trigger != job.trigger && !spec.run_immediately {
                                let next = match job.next_run_time {
                                    Some(at) => Some(at),
                                    None => initial_run_time(&job.trigger, now, &self.tz)?,
                                };
                                self.store.set_next_run(&job.id, next).await?;
                                info!(
                                    "Job '{}' next run moved to {:?}",
                                    job.id,
                                    next.map(|t| t.with_timezone(&self.tz))
                                );
                            }
                            report.replaced.push(job.id.clone());
                        }
                        if spec.run_immediately {
                            self.store.set_next_run(&job.id, Some(now)).await?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// No run is in flight in a fresh process: undo what a crash left behind.
    async fn recover(&self, report: &mut BootstrapReport) -> SchedulerResult<()> {
        for job in self.store.list().await? {
            if job.state == JobState::Running
                && self
                    .store
                    .compare_and_set_state(&job.id, JobState::Running, JobState::Scheduled)
                    .await?
            {
                warn!(
                    "Job '{}' was left running by a previous process; rescheduled",
                    job.id
                );
                report.recovered.push(job.id);
            }
        }

        let Some(rule) = &self.rule else {
            return Ok(());
        };
        for dependent in &rule.dependents {
            match self
                .store
                .compare_and_set_state(dependent, JobState::Paused, JobState::Scheduled)
                .await
            {
                Ok(true) => {
                    warn!(
                        "Dependent job '{}' was left paused by a previous process; resumed",
                        dependent
                    );
                    report.resumed.push(dependent.clone());
                }
                Ok(false) => {}
                Err(StoreError::NotFound(_)) => {
                    warn!("Dependent job '{}' is not registered", dependent);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn check_freshness(&self, report: &mut BootstrapReport) -> SchedulerResult<()> {
        let Some(check) = &self.freshness else {
            return Ok(());
        };
        let Some(rule) = &self.rule else {
            warn!("Freshness check configured without a primary job; ignoring it");
            return Ok(());
        };

        let fresh = match check.is_fresh().await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!("Freshness check failed, assuming data is fresh: {}", e);
                true
            }
        };
        if fresh {
            info!("Data of '{}' is fresh", rule.primary);
            return Ok(());
        }

        let now = self.clock.now();
        match self.store.set_next_run(&rule.primary, Some(now)).await {
            Ok(()) => {
                info!("Data of '{}' is stale, running it now", rule.primary);
                report.forced_primary = true;
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                warn!(
                    "Data is stale but primary job '{}' is not registered",
                    rule.primary
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[path = "bootstrap_tests.rs"]
mod tests;
