    use super::*;
    use crate::schema::SeedJobConfig;

    fn seed(name: &str, job_type: &str, cron: Option<&str>) -> SeedJobConfig {
        SeedJobConfig {
            name: name.to_string(),
            kind: "DUMMY".to_string(),
            job_type: job_type.to_string(),
            cron: cron.map(str::to_string),
            enabled: true,
            params: serde_json::json!({}),
        }
    }

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = ConfigValidator::validate(&config);
        assert!(result.is_valid());
    }

    #[test]
    fn test_validate_zero_tick_capacity() {
        let mut config = Config::default();
        config.scheduler.tick_queue_capacity = 0;

        let result = ConfigValidator::validate(&config);
        assert!(!result.is_valid());
        assert!(result
            .errors
            .iter()
            .any(|e| e.path == "scheduler.tick_queue_capacity"));
    }

    #[test]
    fn test_validate_samples_range() {
        let mut config = Config::default();
        config.stats.samples_per_minute = 61;
        assert!(!ConfigValidator::validate(&config).is_valid());

        config.stats.samples_per_minute = 0;
        assert!(!ConfigValidator::validate(&config).is_valid());

        config.stats.samples_per_minute = 12;
        assert!(ConfigValidator::validate(&config).is_valid());
    }

    #[test]
    fn test_validate_discovery_port_ignored_when_disabled() {
        let mut config = Config::default();
        config.discovery.port = 0;
        assert!(!ConfigValidator::validate(&config).is_valid());

        config.discovery.enabled = false;
        assert!(ConfigValidator::validate(&config).is_valid());
    }

    #[test]
    fn test_validate_bad_base_url() {
        let mut config = Config::default();
        config.discovery.public_base_url = "localhost:8000".to_string();

        let result = ConfigValidator::validate(&config);
        assert!(result
            .errors
            .iter()
            .any(|e| e.path == "discovery.public_base_url"));
    }

    #[test]
    fn test_validate_zero_busy_timeout_warning() {
        let mut config = Config::default();
        config.database.busy_timeout_ms = 0;

        let result = ConfigValidator::validate(&config);
        assert!(result.is_valid());
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn test_validate_seed_cron_rules() {
        let mut config = Config::default();
        config.seed = vec![
            seed("a", "CRON", None),
            seed("b", "MANUAL", Some("* * * * *")),
            seed("c", "HOURLY", None),
            seed("d", "CRON", Some("*/5 * * * *")),
        ];

        let result = ConfigValidator::validate(&config);
        let paths: Vec<_> = result.errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"seed[0].cron"));
        assert!(paths.contains(&"seed[1].cron"));
        assert!(paths.contains(&"seed[2].job_type"));
        assert_eq!(result.errors.len(), 3);
    }

    #[test]
    fn test_validate_seed_duplicate_names() {
        let mut config = Config::default();
        config.seed = vec![
            seed("same", "CRON", Some("* * * * *")),
            seed("same", "MANUAL", None),
        ];

        let result = ConfigValidator::validate(&config);
        assert!(result.errors.iter().any(|e| e.message.contains("Duplicate")));
    }

    #[test]
    fn test_into_result_joins_errors() {
        let mut config = Config::default();
        config.scheduler.tick_queue_capacity = 0;
        config.stats.samples_per_minute = 0;

        let err = ConfigValidator::validate(&config).into_result().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("tick_queue_capacity"));
        assert!(message.contains("samples_per_minute"));
    }
