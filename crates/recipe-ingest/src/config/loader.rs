use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let pipeline = &config.pipeline;
    if pipeline.max_stage_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "pipeline.max_stage_attempts must be at least 1".to_string(),
        });
    }
    if pipeline.extraction_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "pipeline.extraction_attempts must be at least 1".to_string(),
        });
    }

    let poller = &config.poller;
    if poller.backoff_factor < 1.0 {
        return Err(ConfigError::Validation {
            message: format!(
                "poller.backoff_factor must be >= 1.0, got {}",
                poller.backoff_factor
            ),
        });
    }
    if poller.initial_interval_ms > poller.max_interval_ms {
        return Err(ConfigError::Validation {
            message: format!(
                "poller.initial_interval_ms ({}) exceeds poller.max_interval_ms ({})",
                poller.initial_interval_ms, poller.max_interval_ms
            ),
        });
    }

    if config.queue.capacity == 0 {
        return Err(ConfigError::Validation {
            message: "queue.capacity must be at least 1".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_from_str("{}").unwrap();
        assert_eq!(config.pipeline.max_stage_attempts, 3);
        assert_eq!(config.pipeline.retry_base_delay_ms, 500);
        assert_eq!(config.pipeline.max_media_bytes, 100 * 1024 * 1024);
        assert_eq!(config.pipeline.extraction_attempts, 3);
        assert_eq!(config.poller.initial_interval_ms, 1000);
        assert_eq!(config.poller.max_interval_ms, 30_000);
        assert_eq!(config.poller.backoff_factor, 1.5);
        assert_eq!(config.poller.no_progress_timeout_ms, 60_000);
        assert_eq!(config.queue.capacity, 3);
        assert!(config.database.path.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"pipeline": {{"max_stage_attempts": 5, "temp_dir": "/var/tmp/ingest"}}, "queue": {{"capacity": 10}}}}"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.pipeline.max_stage_attempts, 5);
        assert_eq!(
            config.pipeline.resolved_temp_dir(),
            std::path::PathBuf::from("/var/tmp/ingest")
        );
        assert_eq!(config.queue.capacity, 10);
    }

    #[test]
    fn test_missing_file() {
        let result = load_config("/nonexistent/recipe-ingest.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_unknown_field_fails_schema() {
        let result = load_config_from_str(r#"{"pipeline": {"max_attempts": 3}}"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_wrong_type_fails_schema() {
        let result = load_config_from_str(r#"{"queue": {"capacity": "three"}}"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let result = load_config_from_str(r#"{"pipeline": {"max_stage_attempts": 0}}"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let result = load_config_from_str(r#"{"queue": {"capacity": 0}}"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_rejects_shrinking_backoff() {
        let result = load_config_from_str(r#"{"poller": {"backoff_factor": 0.5}}"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_rejects_initial_above_max_interval() {
        let result = load_config_from_str(
            r#"{"poller": {"initial_interval_ms": 5000, "max_interval_ms": 1000}}"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_invalid_json() {
        let result = load_config_from_str("{not json");
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }
}
