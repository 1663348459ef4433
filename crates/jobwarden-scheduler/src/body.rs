//! Job bodies and the freshness predicate.
//!
//! The scheduler only knows jobs by id. What a job actually does is supplied
//! by the embedding program through a [`JobRegistry`] of [`JobBody`]
//! implementations, looked up at run time.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::JobError;

/// What a body is told about the run it performs.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job id.
    pub job_id: String,
    /// Job display name.
    pub name: String,
    /// The scheduled time this run was fired for.
    pub fire_time: DateTime<Utc>,
    /// When the run actually started.
    pub started_at: DateTime<Utc>,
    /// Scheduler time zone.
    pub tz: Tz,
}

/// The work a job performs.
#[async_trait]
pub trait JobBody: Send + Sync {
    async fn run(&self, ctx: &JobContext) -> Result<(), JobError>;
}

struct FnBody<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobBody for FnBody<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        (self.f)(ctx.clone()).await
    }
}

/// Wrap an async closure as a job body.
pub fn body_fn<F, Fut>(f: F) -> Arc<dyn JobBody>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    Arc::new(FnBody { f })
}

/// Job bodies keyed by job id.
#[derive(Default, Clone)]
pub struct JobRegistry {
    bodies: HashMap<String, Arc<dyn JobBody>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a body, replacing any previous body for the same id.
    pub fn insert(&mut self, id: impl Into<String>, body: Arc<dyn JobBody>) {
        self.bodies.insert(id.into(), body);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, id: impl Into<String>, body: Arc<dyn JobBody>) -> Self {
        self.insert(id, body);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn JobBody>> {
        self.bodies.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.bodies.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.bodies.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

/// Decides at startup whether the primary dataset is up to date.
#[async_trait]
pub trait FreshnessCheck: Send + Sync {
    /// `Ok(true)` when fresh, `Ok(false)` when stale.
    async fn is_fresh(&self) -> Result<bool, JobError>;
}

struct FnFreshness<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> FreshnessCheck for FnFreshness<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, JobError>> + Send + 'static,
{
    async fn is_fresh(&self) -> Result<bool, JobError> {
        (self.f)().await
    }
}

/// Wrap an async closure as a freshness check.
pub fn freshness_fn<F, Fut>(f: F) -> Arc<dyn FreshnessCheck>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, JobError>> + Send + 'static,
{
    Arc::new(FnFreshness { f })
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "body_tests.rs"]
mod tests;
