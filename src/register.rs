//! Translation of the configuration file into scheduler objects.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use jobwarden_config::{Config, FreshnessConfig, JobConfig, TriggerConfig};
use jobwarden_scheduler::{
    CronSpec, DependencyRule, DispatcherConfig, FreshnessCheck, InfoJob, Job, JobBody,
    JobContext, JobError, JobRegistry, JobSpec, JobStore, SchedulerMetrics, Trigger,
};

/// Longest stderr excerpt carried in a failure message.
const STDERR_TAIL: usize = 512;

pub(crate) fn build_trigger(config: &TriggerConfig) -> anyhow::Result<Trigger> {
    let trigger = match config {
        TriggerConfig::Cron {
            minute,
            hour,
            day,
            month,
            day_of_week,
        } => {
            let mut spec = CronSpec::new();
            if let Some(v) = minute {
                spec = spec.minute(v.as_str());
            }
            if let Some(v) = hour {
                spec = spec.hour(v.as_str());
            }
            if let Some(v) = day {
                spec = spec.day(v.as_str());
            }
            if let Some(v) = month {
                spec = spec.month(v.as_str());
            }
            if let Some(v) = day_of_week {
                spec = spec.day_of_week(v.as_str());
            }
            Trigger::cron(spec)?
        }
        TriggerConfig::Interval { .. } => {
            let secs = config
                .interval_secs()
                .context("interval does not fit in seconds")?;
            Trigger::interval_secs(secs)?
        }
    };
    Ok(trigger)
}

pub(crate) fn job_spec(config: &JobConfig) -> anyhow::Result<JobSpec> {
    let trigger = build_trigger(&config.trigger)
        .with_context(|| format!("invalid trigger for job '{}'", config.id))?;
    let job = Job::new(config.id.as_str(), trigger)
        .with_name(config.display_name())
        .with_coalesce(config.coalesce)
        .with_misfire_grace_secs(config.misfire_grace());
    Ok(JobSpec::new(job)
        .replace_existing(config.replace_existing)
        .run_immediately(config.run_immediately))
}

pub(crate) fn job_specs(config: &Config) -> anyhow::Result<Vec<JobSpec>> {
    config.jobs.iter().map(job_spec).collect()
}

pub(crate) fn dependency_rule(config: &Config) -> Option<DependencyRule> {
    config
        .dependency
        .as_ref()
        .map(|dep| DependencyRule::new(dep.primary.as_str(), dep.dependents.iter().cloned()))
}

pub(crate) fn dispatcher_config(config: &Config) -> DispatcherConfig {
    DispatcherConfig {
        tick_interval: Duration::from_secs(config.scheduler.tick_interval_secs),
        max_workers: config.scheduler.max_workers,
    }
}

/// Bodies for every configured job. Builtins not known here are skipped;
/// the dispatcher then records a missing-body failure for them.
pub(crate) fn build_registry(
    config: &Config,
    store: Arc<dyn JobStore>,
    metrics: Arc<SchedulerMetrics>,
) -> JobRegistry {
    let mut registry = JobRegistry::new();
    for job in &config.jobs {
        let body: Arc<dyn JobBody> = match (&job.command, job.builtin.as_deref()) {
            (Some(command), _) => Arc::new(CommandBody::new(command, job.working_dir.clone())),
            (None, Some("info")) => {
                Arc::new(InfoJob::new(store.clone()).with_metrics(metrics.clone()))
            }
            (None, other) => {
                warn!("Job '{}' has no runnable body ({:?})", job.id, other);
                continue;
            }
        };
        registry.insert(job.id.as_str(), body);
    }
    info!("Registered bodies for {} job(s)", registry.len());
    registry
}

async fn run_shell(
    command: &str,
    working_dir: Option<&PathBuf>,
    envs: &[(&str, String)],
) -> std::io::Result<Output> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in envs {
        cmd.env(key, value);
    }
    cmd.output().await
}

fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    let start = trimmed
        .char_indices()
        .rev()
        .nth(STDERR_TAIL.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    trimmed[start..].to_string()
}

/// Runs a shell command; a non-zero exit status fails the run.
pub(crate) struct CommandBody {
    command: String,
    working_dir: Option<PathBuf>,
}

impl CommandBody {
    pub(crate) fn new(command: impl Into<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            command: command.into(),
            working_dir,
        }
    }
}

#[async_trait]
impl JobBody for CommandBody {
    async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        let envs = [
            ("JOBWARDEN_JOB_ID", ctx.job_id.clone()),
            ("JOBWARDEN_FIRE_TIME", ctx.fire_time.to_rfc3339()),
        ];
        let output = run_shell(&self.command, self.working_dir.as_ref(), &envs)
            .await
            .map_err(|e| JobError::failed(format!("cannot spawn '{}': {}", self.command, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            debug!(job = %ctx.job_id, "{}", line);
        }

        if output.status.success() {
            Ok(())
        } else {
            let code = output.status.code().unwrap_or(-1);
            Err(JobError::failed(format!(
                "command exited with code {}: {}",
                code,
                stderr_tail(&output)
            )))
        }
    }
}

/// Exit status 0 of the configured command means the data is fresh.
pub(crate) struct CommandFreshness {
    command: String,
    working_dir: Option<PathBuf>,
}

impl CommandFreshness {
    pub(crate) fn from_config(config: &FreshnessConfig) -> Self {
        Self {
            command: config.command.clone(),
            working_dir: config.working_dir.clone(),
        }
    }
}

#[async_trait]
impl FreshnessCheck for CommandFreshness {
    async fn is_fresh(&self) -> Result<bool, JobError> {
        let output = run_shell(&self.command, self.working_dir.as_ref(), &[])
            .await
            .map_err(|e| JobError::failed(format!("cannot spawn '{}': {}", self.command, e)))?;
        Ok(output.status.success())
    }
}

#[cfg(test)]
#[path = "register_tests.rs"]
mod tests;
