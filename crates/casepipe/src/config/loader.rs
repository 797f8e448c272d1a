use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

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

/// Cross-field checks the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation {
            message: "max_retries must be at least 1".to_string(),
        });
    }

    if config.poll_interval_ms == 0
        || config.stage_timeout_secs == 0
        || config.lease_timeout_secs == 0
        || config.shutdown_timeout_secs == 0
    {
        return Err(ConfigError::Validation {
            message: "intervals and timeouts must be positive".to_string(),
        });
    }

    // A lease shorter than a stage would let recovery steal running jobs.
    if config.lease_timeout_secs <= config.stage_timeout_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "lease_timeout_secs ({}) must exceed stage_timeout_secs ({})",
                config.lease_timeout_secs, config.stage_timeout_secs
            ),
        });
    }

    if config.chunking.size == 0 || config.chunking.overlap >= config.chunking.size {
        return Err(ConfigError::Validation {
            message: format!(
                "chunking.overlap ({}) must be smaller than chunking.size ({})",
                config.chunking.overlap, config.chunking.size
            ),
        });
    }

    if config.embedding.dimension == 0 {
        return Err(ConfigError::Validation {
            message: "embedding.dimension must be positive".to_string(),
        });
    }

    Ok(())
}
