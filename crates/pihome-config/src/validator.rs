//! Configuration validation.

use std::collections::HashSet;

use crate::error::ConfigError;
use crate::schema::Config;

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

    /// Collapse into a single error when validation failed.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        if self.is_valid() {
            return Ok(self.warnings);
        }
        let message = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(ConfigError::Invalid(message))
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
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_database(config, &mut result);
        Self::validate_scheduler(config, &mut result);
        Self::validate_stats(config, &mut result);
        Self::validate_discovery(config, &mut result);
        Self::validate_seed(config, &mut result);

        result
    }

    fn validate_database(config: &Config, result: &mut ValidationResult) {
        if config.database.path.trim().is_empty() {
            result.add_error(ValidationError::new(
                "database.path",
                "Database path cannot be empty",
            ));
        }

        if config.database.busy_timeout_ms == 0 {
            result.add_warning(ValidationWarning::new(
                "database.busy_timeout_ms",
                "busy timeout of 0 makes concurrent ticks fail instead of waiting",
            ));
        }
    }

    fn validate_scheduler(config: &Config, result: &mut ValidationResult) {
        if config.scheduler.tick_queue_capacity == 0 {
            result.add_error(ValidationError::new(
                "scheduler.tick_queue_capacity",
                "tick_queue_capacity must be greater than 0",
            ));
        }
    }

    fn validate_stats(config: &Config, result: &mut ValidationResult) {
        let samples = config.stats.samples_per_minute;
        if samples == 0 || samples > 60 {
            result.add_error(ValidationError::new(
                "stats.samples_per_minute",
                "samples_per_minute must be between 1 and 60",
            ));
        }
    }

    fn validate_discovery(config: &Config, result: &mut ValidationResult) {
        if !config.discovery.enabled {
            return;
        }

        if config.discovery.port == 0 {
            result.add_error(ValidationError::new("discovery.port", "Port cannot be 0"));
        }

        let url = &config.discovery.public_base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            result.add_error(ValidationError::new(
                "discovery.public_base_url",
                "public_base_url must start with http:// or https://",
            ));
        }

        if config.discovery.probe.trim().is_empty() {
            result.add_error(ValidationError::new(
                "discovery.probe",
                "probe cannot be empty",
            ));
        }
    }

    fn validate_seed(config: &Config, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for (idx, job) in config.seed.iter().enumerate() {
            let path = format!("seed[{idx}]");
            if job.name.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{path}.name"),
                    "Job name cannot be empty",
                ));
            } else if !seen.insert(job.name.as_str()) {
                result.add_error(ValidationError::new(
                    format!("{path}.name"),
                    format!("Duplicate job name '{}'", job.name),
                ));
            }

            match (job.job_type.as_str(), job.cron.is_some()) {
                ("CRON", false) => result.add_error(ValidationError::new(
                    format!("{path}.cron"),
                    "CRON jobs require a cron expression",
                )),
                ("MANUAL", true) => result.add_error(ValidationError::new(
                    format!("{path}.cron"),
                    "MANUAL jobs must not have a cron expression",
                )),
                ("CRON", true) | ("MANUAL", false) => {}
                (other, _) => result.add_error(ValidationError::new(
                    format!("{path}.job_type"),
                    format!("Unknown job_type '{other}' (expected CRON or MANUAL)"),
                )),
            }

            if !job.params.is_object() {
                result.add_error(ValidationError::new(
                    format!("{path}.params"),
                    "params must be a table",
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
