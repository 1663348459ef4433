//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Built-in job bodies that need no command.
pub const BUILTINS: &[&str] = &["info"];

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<DependencyConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness: Option<FreshnessConfig>,

    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl Config {
    /// Look up a job by id.
    pub fn job(&self, id: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|job| job.id == id)
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA time zone for cron triggers and reports. Falls back to `$TZ`, then UTC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// Job store URI: `sqlite://<path>`, `sqlite::memory:` or `memory://`.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Longest sleep between two scans.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Maximum concurrently executing jobs.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl SchedulerConfig {
    /// The configured zone name, else `$TZ`, else `UTC`.
    pub fn timezone_name(&self) -> String {
        self.timezone
            .clone()
            .or_else(|| std::env::var("TZ").ok().filter(|tz| !tz.is_empty()))
            .unwrap_or_else(|| "UTC".to_string())
    }

    /// The configured zone parsed.
    pub fn timezone(&self) -> Result<chrono_tz::Tz, String> {
        let name = self.timezone_name();
        name.parse::<chrono_tz::Tz>()
            .map_err(|_| format!("unknown time zone '{}'", name))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: None,
            database_url: default_database_url(),
            tick_interval_secs: default_tick_interval_secs(),
            max_workers: default_max_workers(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://~/.jobwarden/jobs.db".to_string()
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_max_workers() -> usize {
    4
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for rolling log files. Defaults to `~/.jobwarden/logs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn log_dir(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".jobwarden")
                .join("logs")
        })
    }
}

/// The primary job and the jobs paused while it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    pub primary: String,

    #[serde(default)]
    pub dependents: Vec<String>,
}

/// Startup check deciding whether the primary must run immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessConfig {
    /// Shell command; exit status 0 means the data is fresh.
    pub command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// One configured job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Shell command run with `sh -c`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Name of a built-in body instead of a command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    pub trigger: TriggerConfig,

    #[serde(default)]
    pub coalesce: bool,

    /// Maximum lateness of a run before it is dropped.
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,

    /// Never drop late runs; overrides `misfire_grace_secs`.
    #[serde(default)]
    pub misfire_grace_unlimited: bool,

    /// Run once as soon as the job is registered.
    #[serde(default)]
    pub run_immediately: bool,

    /// Refresh the stored definition on startup when it changed.
    #[serde(default = "default_replace_existing")]
    pub replace_existing: bool,
}

impl JobConfig {
    /// Effective grace period; `None` is unlimited.
    pub fn misfire_grace(&self) -> Option<u64> {
        if self.misfire_grace_unlimited {
            None
        } else {
            Some(self.misfire_grace_secs)
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

fn default_misfire_grace_secs() -> u64 {
    1
}

fn default_replace_existing() -> bool {
    true
}

/// Trigger section of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Calendar trigger. Omitted fields more significant than the most
    /// significant given field match any value; less significant ones match
    /// their minimum.
    Cron {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minute: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hour: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        day: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        month: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        day_of_week: Option<String>,
    },
    /// Fixed period; the parts are added up.
    Interval {
        #[serde(default)]
        seconds: u64,
        #[serde(default)]
        minutes: u64,
        #[serde(default)]
        hours: u64,
        #[serde(default)]
        days: u64,
    },
}

impl TriggerConfig {
    /// Total interval period in seconds; `None` for cron triggers or on overflow.
    pub fn interval_secs(&self) -> Option<u64> {
        match self {
            TriggerConfig::Cron { .. } => None,
            TriggerConfig::Interval {
                seconds,
                minutes,
                hours,
                days,
            } => days
                .checked_mul(86_400)?
                .checked_add(hours.checked_mul(3_600)?)?
                .checked_add(minutes.checked_mul(60)?)?
                .checked_add(*seconds),
        }
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
