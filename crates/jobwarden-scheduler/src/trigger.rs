//! Trigger evaluation.
//!
//! Everything in this module is a pure function of the trigger, a reference
//! time and the scheduler's time zone. Nothing here touches the store or the
//! clock, so every scheduling decision can be unit tested with fixed instants.
//!
//! Cron fields follow the usual calendar-trigger convention: an unset field
//! matches anything, except that fields less significant than the least
//! significant given field default to their minimum. `{ day: "1", hour: "1" }`
//! therefore fires at 01:00:00 on the first of every month, while
//! `{ day: "1", minute: "30" }` fires at half past every hour of that day.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::error::TriggerError;
use crate::job::Job;

/// Result type for trigger evaluation.
pub type TriggerResult<T> = Result<T, TriggerError>;

/// Calendar fields of a cron trigger. `None` means "not specified".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,

    /// Day of week, as names (`MON-FRI`) or cron numbers (1 = Sunday).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,
}

impl CronSpec {
    /// Empty spec (fires every minute).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn minute(mut self, value: impl Into<String>) -> Self {
        self.minute = Some(value.into());
        self
    }

    pub fn hour(mut self, value: impl Into<String>) -> Self {
        self.hour = Some(value.into());
        self
    }

    pub fn day(mut self, value: impl Into<String>) -> Self {
        self.day = Some(value.into());
        self
    }

    pub fn month(mut self, value: impl Into<String>) -> Self {
        self.month = Some(value.into());
        self
    }

    pub fn day_of_week(mut self, value: impl Into<String>) -> Self {
        self.day_of_week = Some(value.into());
        self
    }

    /// Fields ordered from most to least significant, with their name and
    /// the value used when they are implicitly pinned to their minimum.
    fn fields(&self) -> [(&'static str, Option<&str>, Option<&'static str>); 5] {
        [
            ("month", self.month.as_deref(), None),
            ("day", self.day.as_deref(), Some("1")),
            ("day_of_week", self.day_of_week.as_deref(), None),
            ("hour", self.hour.as_deref(), Some("0")),
            ("minute", self.minute.as_deref(), Some("0")),
        ]
    }

    /// Six-field cron expression (`sec min hour dom month dow`).
    pub fn expression(&self) -> String {
        let fields = self.fields();
        // day_of_week sits below day, so day is never pinned once
        // day_of_week is given; the cron crate would AND the two.
        let last_given = fields.iter().rposition(|(_, value, _)| value.is_some());

        let resolved: Vec<String> = fields
            .iter()
            .enumerate()
            .map(|(index, (_, value, minimum))| match value {
                Some(v) => v.trim().to_string(),
                None => match (last_given, minimum) {
                    (Some(last), Some(min)) if index > last => (*min).to_string(),
                    _ => "*".to_string(),
                },
            })
            .collect();

        // resolved: month, day, day_of_week, hour, minute
        format!(
            "0 {} {} {} {} {}",
            resolved[4], resolved[3], resolved[1], resolved[0], resolved[2]
        )
    }

    fn schedule(&self) -> TriggerResult<Schedule> {
        let expression = self.expression();
        Schedule::from_str(&expression).map_err(|e| TriggerError::InvalidCron {
            expression,
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for CronSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let given: Vec<String> = self
            .fields()
            .iter()
            .filter_map(|(name, value, _)| value.map(|v| format!("{}='{}'", name, v)))
            .collect();
        write!(f, "cron[{}]", given.join(", "))
    }
}

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Calendar trigger.
    Cron(CronSpec),
    /// Fixed period since the previous firing.
    Interval { every_secs: u64 },
}

impl Trigger {
    /// Build a cron trigger, validating its fields.
    pub fn cron(spec: CronSpec) -> TriggerResult<Self> {
        spec.schedule()?;
        Ok(Trigger::Cron(spec))
    }

    /// Build an interval trigger.
    pub fn interval_secs(every_secs: u64) -> TriggerResult<Self> {
        if every_secs == 0 {
            return Err(TriggerError::ZeroInterval);
        }
        Ok(Trigger::Interval { every_secs })
    }

    /// Build an interval trigger from a duration (sub-second parts are dropped).
    pub fn interval(every: std::time::Duration) -> TriggerResult<Self> {
        Self::interval_secs(every.as_secs())
    }

    /// Check that the trigger can be evaluated.
    pub fn validate(&self) -> TriggerResult<()> {
        match self {
            Trigger::Cron(spec) => spec.schedule().map(|_| ()),
            Trigger::Interval { every_secs: 0 } => Err(TriggerError::ZeroInterval),
            Trigger::Interval { .. } => Ok(()),
        }
    }

    /// First fire time at or after `t`. Interval triggers fire immediately.
    pub fn next_fire_at_or_after(
        &self,
        t: DateTime<Utc>,
        tz: &Tz,
    ) -> TriggerResult<Option<DateTime<Utc>>> {
        match self {
            Trigger::Interval { .. } => Ok(Some(t)),
            Trigger::Cron(spec) => {
                let schedule = spec.schedule()?;
                let start = (t - Duration::seconds(1)).with_timezone(tz);
                Ok(schedule
                    .after(&start)
                    .map(|fire| fire.with_timezone(&Utc))
                    .find(|fire| *fire >= t))
            }
        }
    }

    /// First fire time strictly after a previous firing.
    pub fn next_fire_after(
        &self,
        previous: DateTime<Utc>,
        tz: &Tz,
    ) -> TriggerResult<Option<DateTime<Utc>>> {
        match self {
            Trigger::Interval { every_secs } => Ok(previous.checked_add_signed(period(*every_secs))),
            Trigger::Cron(spec) => {
                let schedule = spec.schedule()?;
                Ok(schedule
                    .after(&previous.with_timezone(tz))
                    .next()
                    .map(|fire| fire.with_timezone(&Utc)))
            }
        }
    }

    /// First fire of the sequence anchored at `anchor` that is at or after `t`.
    fn chain_at_or_after(
        &self,
        anchor: DateTime<Utc>,
        t: DateTime<Utc>,
        tz: &Tz,
    ) -> TriggerResult<Option<DateTime<Utc>>> {
        if anchor >= t {
            return Ok(Some(anchor));
        }
        match self {
            Trigger::Interval { every_secs } => {
                let (steps, exact) = steps_between(anchor, t, *every_secs);
                let steps = if exact { steps } else { steps + 1 };
                Ok(advance(anchor, steps, *every_secs))
            }
            Trigger::Cron(_) => self.next_fire_at_or_after(t, tz),
        }
    }

    /// First fire of the sequence anchored at `anchor` that is strictly after `t`.
    fn chain_after(
        &self,
        anchor: DateTime<Utc>,
        t: DateTime<Utc>,
        tz: &Tz,
    ) -> TriggerResult<Option<DateTime<Utc>>> {
        if anchor > t {
            return Ok(Some(anchor));
        }
        match self {
            Trigger::Interval { every_secs } => {
                let (steps, _) = steps_between(anchor, t, *every_secs);
                Ok(advance(anchor, steps + 1, *every_secs))
            }
            Trigger::Cron(_) => self.next_fire_after(t, tz),
        }
    }

    /// Last fire of the sequence anchored at `anchor` that is at or before `t`.
    /// Returns `anchor` itself when nothing later qualifies.
    fn chain_last_at_or_before(
        &self,
        anchor: DateTime<Utc>,
        t: DateTime<Utc>,
        tz: &Tz,
    ) -> TriggerResult<DateTime<Utc>> {
        if anchor >= t {
            return Ok(anchor);
        }
        match self {
            Trigger::Interval { every_secs } => {
                let (steps, _) = steps_between(anchor, t, *every_secs);
                Ok(advance(anchor, steps, *every_secs).unwrap_or(anchor))
            }
            Trigger::Cron(spec) => {
                let schedule = spec.schedule()?;
                Ok(schedule
                    .after(&anchor.with_timezone(tz))
                    .map(|fire| fire.with_timezone(&Utc))
                    .take_while(|fire| *fire <= t)
                    .last()
                    .unwrap_or(anchor))
            }
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Cron(spec) => write!(f, "{}", spec),
            Trigger::Interval { every_secs } => {
                let (h, rem) = (every_secs / 3600, every_secs % 3600);
                write!(f, "interval[{}:{:02}:{:02}]", h, rem / 60, rem % 60)
            }
        }
    }
}

fn period(every_secs: u64) -> Duration {
    i64::try_from(every_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Whole periods between `anchor` and `t` (t >= anchor), and whether `t`
/// lands exactly on a period boundary.
fn steps_between(anchor: DateTime<Utc>, t: DateTime<Utc>, every_secs: u64) -> (i64, bool) {
    let elapsed = (t - anchor).num_microseconds().unwrap_or(i64::MAX);
    let every = i64::try_from(every_secs)
        .ok()
        .and_then(|s| s.checked_mul(1_000_000))
        .unwrap_or(i64::MAX);
    (elapsed / every, elapsed % every == 0)
}

fn advance(anchor: DateTime<Utc>, steps: i64, every_secs: u64) -> Option<DateTime<Utc>> {
    let offset = i64::try_from(every_secs).ok()?.checked_mul(steps)?;
    anchor.checked_add_signed(Duration::try_seconds(offset)?)
}

/// What the dispatcher should do with a due job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    /// Scheduled time to execute now, if any.
    pub fire_time: Option<DateTime<Utc>>,
    /// Next run time to store once this plan is applied.
    pub next_run_time: Option<DateTime<Utc>>,
    /// At least one due firing was dropped for exceeding the grace period.
    pub skipped: bool,
    /// Several due firings were collapsed into `fire_time`.
    pub coalesced: bool,
}

impl RunPlan {
    fn not_due(next_run_time: Option<DateTime<Utc>>) -> Self {
        Self {
            fire_time: None,
            next_run_time,
            skipped: false,
            coalesced: false,
        }
    }

    /// Whether nothing runs and the due firing was dropped.
    pub fn is_misfire(&self) -> bool {
        self.fire_time.is_none() && self.skipped
    }
}

/// Decide which firing of a job to execute at `now`.
///
/// Due firings are the stored `next_run_time` followed by every later fire
/// of the trigger up to `now`. Firings older than the grace period are
/// dropped. With `coalesce` the latest remaining firing runs and the backlog
/// is discarded; without it the earliest remaining firing runs and the next
/// run time stays in the past, so later ticks work through the backlog one
/// firing at a time.
pub fn plan_run(job: &Job, now: DateTime<Utc>, tz: &Tz) -> TriggerResult<RunPlan> {
    let scheduled = match job.next_run_time {
        Some(at) if at <= now => at,
        other => return Ok(RunPlan::not_due(other)),
    };
    let trigger = &job.trigger;

    let cutoff = job.misfire_grace().and_then(|grace| now.checked_sub_signed(grace));
    let first_valid = match cutoff {
        None => Some(scheduled),
        Some(cutoff) => trigger
            .chain_at_or_after(scheduled, cutoff, tz)?
            .filter(|fire| *fire <= now),
    };
    let skipped = first_valid != Some(scheduled);

    let Some(first_valid) = first_valid else {
        return Ok(RunPlan {
            fire_time: None,
            next_run_time: trigger.chain_after(scheduled, now, tz)?,
            skipped,
            coalesced: false,
        });
    };

    if job.coalesce {
        let fire = trigger.chain_last_at_or_before(first_valid, now, tz)?;
        Ok(RunPlan {
            fire_time: Some(fire),
            next_run_time: trigger.chain_after(fire, now, tz)?,
            skipped,
            coalesced: fire != first_valid,
        })
    } else {
        Ok(RunPlan {
            fire_time: Some(first_valid),
            next_run_time: trigger.next_fire_after(first_valid, tz)?,
            skipped,
            coalesced: false,
        })
    }
}

/// First run time for a job that has never been scheduled.
pub fn initial_run_time(
    trigger: &Trigger,
    now: DateTime<Utc>,
    tz: &Tz,
) -> TriggerResult<Option<DateTime<Utc>>> {
    trigger.next_fire_at_or_after(now, tz)
}

#[cfg(test)]
#[path = "trigger_tests.rs"]
mod tests;
