//! Dependency coordinator.
//!
//! Keeps dependent jobs paused while their primary job runs: a `Started`
//! event for the primary pauses every dependent, the matching `Finished`
//! event resumes them. Dependents that do not exist are logged and skipped.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{ListenerError, StoreError};
use crate::events::{EventBus, JobEvent, JobEventKind, JobListener};
use crate::job::JobState;
use crate::store::JobStore;

/// One primary job and the jobs that must not run while it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRule {
    pub primary: String,
    #[serde(default)]
    pub dependents: Vec<String>,
}

impl DependencyRule {
    pub fn new<I, S>(primary: impl Into<String>, dependents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            primary: primary.into(),
            dependents: dependents.into_iter().map(Into::into).collect(),
        }
    }
}

/// Event listener enforcing a [`DependencyRule`].
pub struct DependencyCoordinator {
    rule: DependencyRule,
    store: Arc<dyn JobStore>,
}

impl DependencyCoordinator {
    pub fn new(rule: DependencyRule, store: Arc<dyn JobStore>) -> Self {
        Self { rule, store }
    }

    pub fn rule(&self) -> &DependencyRule {
        &self.rule
    }

    /// Subscribe to both `Started` and `Finished` events.
    pub fn attach(self: Arc<Self>, bus: &EventBus) {
        bus.subscribe(JobEventKind::Started, self.clone());
        bus.subscribe(JobEventKind::Finished, self.clone());
        info!(
            "Dependency coordinator attached: '{}' pauses {:?}",
            self.rule.primary, self.rule.dependents
        );
    }

    /// Pause every dependent.
    pub async fn pause_dependents(&self) -> Result<(), ListenerError> {
        self.set_dependents(JobState::Paused).await
    }

    /// Resume every dependent.
    pub async fn resume_dependents(&self) -> Result<(), ListenerError> {
        self.set_dependents(JobState::Scheduled).await
    }

    async fn set_dependents(&self, state: JobState) -> Result<(), ListenerError> {
        let (action, done) = if state == JobState::Paused {
            ("pause", "Paused")
        } else {
            ("resume", "Resumed")
        };
        let mut first_error: Option<StoreError> = None;

        for dependent in &self.rule.dependents {
            match self.store.update_state(dependent, state).await {
                Ok(()) => debug!("{} job '{}'", done, dependent),
                Err(StoreError::NotFound(_)) => {
                    warn!(
                        "Cannot {} job '{}': no such job (is it registered?)",
                        action, dependent
                    );
                }
                Err(e) => {
                    error!("Failed to {} job '{}': {}", action, dependent, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl JobListener for DependencyCoordinator {
    async fn on_event(&self, event: &JobEvent) -> Result<(), ListenerError> {
        if event.job_id != self.rule.primary {
            return Ok(());
        }
        match event.kind {
            JobEventKind::Started => {
                info!(
                    "Primary job '{}' started, pausing {} dependent(s)",
                    event.job_id,
                    self.rule.dependents.len()
                );
                self.pause_dependents().await
            }
            JobEventKind::Finished => {
                info!(
                    "Primary job '{}' finished, resuming {} dependent(s)",
                    event.job_id,
                    self.rule.dependents.len()
                );
                self.resume_dependents().await
            }
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
