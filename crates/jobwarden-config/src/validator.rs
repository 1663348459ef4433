//! Configuration validation.

use std::collections::HashSet;

use crate::error::ConfigError;
use crate::schema::{Config, TriggerConfig, BUILTINS};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn the first error into a [`ConfigError`].
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(ConfigError::InvalidValue {
                field: error.path,
                message: error.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_scheduler(config, &mut result);
        Self::validate_jobs(config, &mut result);
        Self::validate_dependency(config, &mut result);
        Self::validate_freshness(config, &mut result);

        Ok(result)
    }

    fn validate_scheduler(config: &Config, result: &mut ValidationResult) {
        let scheduler = &config.scheduler;

        if let Err(message) = scheduler.timezone() {
            result.add_error(ValidationError::new("scheduler.timezone", message));
        }

        if scheduler.database_url.trim().is_empty() {
            result.add_error(ValidationError::new(
                "scheduler.database_url",
                "database_url cannot be empty",
            ));
        }

        if scheduler.tick_interval_secs == 0 {
            result.add_error(ValidationError::new(
                "scheduler.tick_interval_secs",
                "tick_interval_secs must be greater than 0",
            ));
        }

        if scheduler.max_workers == 0 {
            result.add_error(ValidationError::new(
                "scheduler.max_workers",
                "max_workers must be greater than 0",
            ));
        }
    }

    fn validate_jobs(config: &Config, result: &mut ValidationResult) {
        let mut seen = HashSet::new();

        for (index, job) in config.jobs.iter().enumerate() {
            let path = format!("jobs[{}]", index);

            if job.id.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.id", path),
                    "Job id cannot be empty",
                ));
            } else if !seen.insert(job.id.as_str()) {
                result.add_error(ValidationError::new(
                    format!("{}.id", path),
                    format!("Duplicate job id '{}'", job.id),
                ));
            }

            match (&job.command, &job.builtin) {
                (None, None) => result.add_error(ValidationError::new(
                    path.clone(),
                    format!("Job '{}' needs either a command or a builtin", job.id),
                )),
                (Some(_), Some(_)) => result.add_error(ValidationError::new(
                    path.clone(),
                    format!("Job '{}' has both a command and a builtin", job.id),
                )),
                (Some(command), None) if command.trim().is_empty() => {
                    result.add_error(ValidationError::new(
                        format!("{}.command", path),
                        "command cannot be empty",
                    ))
                }
                (None, Some(builtin)) if !BUILTINS.contains(&builtin.as_str()) => {
                    result.add_error(ValidationError::new(
                        format!("{}.builtin", path),
                        format!("Unknown builtin '{}', valid values: {:?}", builtin, BUILTINS),
                    ))
                }
                _ => {}
            }

            if let TriggerConfig::Interval { .. } = job.trigger {
                match job.trigger.interval_secs() {
                    None => result.add_error(ValidationError::new(
                        format!("{}.trigger", path),
                        "interval is too large",
                    )),
                    Some(0) => result.add_error(ValidationError::new(
                        format!("{}.trigger", path),
                        "interval must be greater than 0",
                    )),
                    Some(secs) if secs < config.scheduler.tick_interval_secs => {
                        result.add_warning(ValidationWarning::new(
                            format!("{}.trigger", path),
                            format!(
                                "interval of {}s is shorter than the {}s tick interval",
                                secs, config.scheduler.tick_interval_secs
                            ),
                        ))
                    }
                    Some(_) => {}
                }
            }
        }
    }

    fn validate_dependency(config: &Config, result: &mut ValidationResult) {
        let Some(dependency) = &config.dependency else {
            return;
        };

        if dependency.primary.trim().is_empty() {
            result.add_error(ValidationError::new(
                "dependency.primary",
                "primary cannot be empty",
            ));
            return;
        }

        if dependency.dependents.contains(&dependency.primary) {
            result.add_error(ValidationError::new(
                "dependency.dependents",
                format!("'{}' cannot depend on itself", dependency.primary),
            ));
        }

        // Missing ids are tolerated at runtime; the coordinator skips them.
        if config.job(&dependency.primary).is_none() {
            result.add_warning(ValidationWarning::new(
                "dependency.primary",
                format!("Primary job '{}' is not declared", dependency.primary),
            ));
        }
        for dependent in &dependency.dependents {
            if config.job(dependent).is_none() {
                result.add_warning(ValidationWarning::new(
                    "dependency.dependents",
                    format!("Dependent job '{}' is not declared", dependent),
                ));
            }
        }
    }

    fn validate_freshness(config: &Config, result: &mut ValidationResult) {
        let Some(freshness) = &config.freshness else {
            return;
        };

        if freshness.command.trim().is_empty() {
            result.add_error(ValidationError::new(
                "freshness.command",
                "command cannot be empty",
            ));
        }

        if config.dependency.is_none() {
            result.add_warning(ValidationWarning::new(
                "freshness",
                "Freshness check has no primary job to force and will be ignored",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
