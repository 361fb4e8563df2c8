//! Configuration loader.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::schema::Config;

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a file, falling back to defaults when the
    /// file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) => Ok(Config::default()),
            other => other,
        }
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let mut result = content.to_string();
        let re = regex::Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/.pihome/pihome.db`).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ScheduleZone, SingleRunnerPolicy};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.scheduler.tick_queue_capacity, 1);
        assert!(config.seed.is_empty());
    }

    #[test]
    fn test_expand_path() {
        let expanded = ConfigLoader::expand_path("~/.pihome");
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_load_scheduler_section() {
        let content = r#"
            [scheduler]
            timezone = "local"
            single_runner = "per_job"
            tick_queue_capacity = 2
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.scheduler.timezone, ScheduleZone::Local);
        assert_eq!(config.scheduler.single_runner, SingleRunnerPolicy::PerJob);
        assert_eq!(config.scheduler.tick_queue_capacity, 2);
    }

    #[test]
    fn test_load_unknown_timezone_rejected() {
        let content = r#"
            [scheduler]
            timezone = "mars"
        "#;
        assert!(ConfigLoader::load_str(content).is_err());
    }

    #[test]
    fn test_load_seed_list() {
        let content = r#"
            [[seed]]
            name = "weather-hourly"
            kind = "WEATHER"
            cron = "0 * * * *"

            [[seed]]
            name = "push-now"
            kind = "PUSH"
            job_type = "MANUAL"
            enabled = false
            params = { display = "kitchen" }
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.seed.len(), 2);
        assert_eq!(config.seed[0].job_type, "CRON");
        assert!(config.seed[0].enabled);
        assert_eq!(config.seed[1].cron, None);
        assert_eq!(config.seed[1].params["display"], "kitchen");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[discovery]").unwrap();
        writeln!(file, "port = 40000").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.discovery.port, 40000);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/pihome.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_or_default_nonexistent_file() {
        let config =
            ConfigLoader::load_or_default(Path::new("/nonexistent/path/pihome.toml")).unwrap();
        assert!(config.scheduler.enabled);
    }

    #[test]
    fn test_env_var_expansion() {
        // SAFETY: test-local variable name, not read concurrently elsewhere.
        unsafe { std::env::set_var("PIHOME_TEST_DB_PATH", "/tmp/pihome-test.db") };
        let content = r#"
            [database]
            path = "${PIHOME_TEST_DB_PATH}"
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.database.path, "/tmp/pihome-test.db");
    }

    #[test]
    fn test_missing_env_var() {
        let content = r#"
            [database]
            path = "${PIHOME_SURELY_NOT_SET_12345}"
        "#;
        let result = ConfigLoader::load_str(content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(_))));
    }
}
