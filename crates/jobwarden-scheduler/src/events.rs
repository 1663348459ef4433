//! In-process event bus for job lifecycle events.
//!
//! Listeners are awaited in subscription order inside the publishing task.
//! A listener that fails or panics is logged and skipped; it never affects
//! the remaining listeners or the publisher.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::body::panic_message;
use crate::error::ListenerError;

/// Lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEventKind {
    /// A run has been claimed and is about to invoke its body.
    Started,
    /// The body of a run has completed (successfully or not).
    Finished,
}

impl fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobEventKind::Started => f.write_str("started"),
            JobEventKind::Finished => f.write_str("finished"),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Ok,
    Failed(String),
}

impl RunOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, RunOutcome::Ok)
    }
}

/// A transient lifecycle event. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job_id: String,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// The scheduled time of the run the event belongs to.
    pub fire_time: DateTime<Utc>,
    /// Present on `Finished` only.
    pub outcome: Option<RunOutcome>,
}

impl JobEvent {
    pub fn started(
        job_id: impl Into<String>,
        fire_time: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: JobEventKind::Started,
            job_id: job_id.into(),
            timestamp,
            fire_time,
            outcome: None,
        }
    }

    pub fn finished(
        job_id: impl Into<String>,
        fire_time: DateTime<Utc>,
        timestamp: DateTime<Utc>,
        outcome: RunOutcome,
    ) -> Self {
        Self {
            kind: JobEventKind::Finished,
            job_id: job_id.into(),
            timestamp,
            fire_time,
            outcome: Some(outcome),
        }
    }
}

/// Receives job events from an [`EventBus`].
#[async_trait]
pub trait JobListener: Send + Sync {
    async fn on_event(&self, event: &JobEvent) -> Result<(), ListenerError>;
}

struct FnListener<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobListener for FnListener<F>
where
    F: Fn(JobEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    async fn on_event(&self, event: &JobEvent) -> Result<(), ListenerError> {
        (self.f)(event.clone()).await
    }
}

/// Wrap an async closure as a listener.
pub fn listener_fn<F, Fut>(f: F) -> Arc<dyn JobListener>
where
    F: Fn(JobEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    Arc::new(FnListener { f })
}

/// Fan-out of job events to subscribed listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(JobEventKind, Arc<dyn JobListener>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a listener to one event kind.
    pub fn subscribe(&self, kind: JobEventKind, listener: Arc<dyn JobListener>) {
        self.listeners.write().push((kind, listener));
    }

    /// Number of listeners subscribed to `kind`.
    pub fn listener_count(&self, kind: JobEventKind) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Deliver an event to every listener of its kind, in subscription order.
    ///
    /// Returns the number of listeners that failed or panicked.
    pub async fn publish(&self, event: &JobEvent) -> usize {
        let listeners: Vec<Arc<dyn JobListener>> = self
            .listeners
            .read()
            .iter()
            .filter(|(kind, _)| *kind == event.kind)
            .map(|(_, listener)| listener.clone())
            .collect();

        debug!(
            "Publishing {} event for job '{}' to {} listener(s)",
            event.kind,
            event.job_id,
            listeners.len()
        );

        let mut failures = 0;
        for listener in listeners {
            match AssertUnwindSafe(listener.on_event(event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(
                        "Listener failed on {} event for job '{}': {}",
                        event.kind, event.job_id, e
                    );
                }
                Err(payload) => {
                    failures += 1;
                    error!(
                        "Listener panicked on {} event for job '{}': {}",
                        event.kind,
                        event.job_id,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        failures
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("started", &self.listener_count(JobEventKind::Started))
            .field("finished", &self.listener_count(JobEventKind::Finished))
            .finish()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
