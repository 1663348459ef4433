//! # jobwarden scheduler
//!
//! Dependency-aware job scheduler core: a small set of named, recurring jobs
//! executed on cron or interval triggers, with one primary job whose run
//! pauses a set of dependent jobs until it finishes.
//!
//! ## Architecture
//!
//! ```text
//!  ┌────────────┐   due jobs   ┌────────────┐  Started/Finished  ┌───────────┐
//!  │  Trigger   ├─────────────►│ Dispatcher ├───────────────────►│ Event Bus │
//!  │ Evaluator  │              │ (tick loop)│                    └─────┬─────┘
//!  └────────────┘              └─────┬──────┘                          │
//!                                    │ claim / bookkeeping             ▼
//!                              ┌─────▼──────┐   pause / resume  ┌────────────┐
//!                              │ Job Record │◄──────────────────┤ Dependency │
//!                              │   Store    │                   │ Coordinator│
//!                              └────────────┘                   └────────────┘
//! ```
//!
//! [`Bootstrap`] runs once before the tick loop: idempotent registration,
//! crash recovery, coordinator attachment and the freshness check.
//!
//! ## Key Components
//!
//! - [`Trigger`]: cron and interval triggers, [`plan_run`] misfire/coalesce rules
//! - [`JobStore`]: durable job records ([`SqliteJobStore`], [`MemoryJobStore`])
//! - [`Dispatcher`]: tick loop and bounded worker pool
//! - [`EventBus`]: synchronous fan-out of [`JobEvent`]s
//! - [`DependencyCoordinator`]: pause/resume of dependents
//! - [`InfoJob`]: the informational job

pub mod body;
pub mod bootstrap;
pub mod clock;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod introspection;
pub mod job;
pub mod metrics;
pub mod store;
pub mod trigger;

// Re-exports
pub use body::{body_fn, freshness_fn, FreshnessCheck, JobBody, JobContext, JobRegistry};
pub use bootstrap::{Bootstrap, BootstrapReport, JobSpec};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{DependencyCoordinator, DependencyRule};
pub use dispatcher::{Dispatcher, DispatcherConfig, TickReport};
pub use error::{
    JobError, ListenerError, SchedulerError, SchedulerResult, StoreError, StoreResult,
    TriggerError,
};
pub use events::{listener_fn, EventBus, JobEvent, JobEventKind, JobListener, RunOutcome};
pub use introspection::{describe_jobs, render_report, InfoJob, JobSummary};
pub use job::{Job, JobState, RunRecord};
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
pub use store::{open_store, JobStore, MemoryJobStore, Registration, SqliteJobStore};
pub use trigger::{initial_run_time, plan_run, CronSpec, RunPlan, Trigger, TriggerResult};

// Re-export the time zone type used throughout the API.
pub use chrono_tz::Tz;
