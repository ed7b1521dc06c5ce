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
        .map(|e| format!("{} at {}", e, e.instance_path()))
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Checks the constraints the schema cannot express, and repeats the range
/// checks for configs built in code rather than parsed.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let image = &config.websocket.image;
    if !(0.0..=1.0).contains(&image.quality) {
        return Err(ConfigError::Validation {
            message: format!(
                "websocket.image.quality must be between 0 and 1, got {}",
                image.quality
            ),
        });
    }
    if image.max_width == 0 || image.max_height == 0 {
        return Err(ConfigError::Validation {
            message: "websocket.image max-width and max-height must be at least 1".to_string(),
        });
    }

    if config.worker.count == 0 {
        return Err(ConfigError::Validation {
            message: "worker.count must be at least 1".to_string(),
        });
    }
    if config.worker.effective_queue_capacity() == 0 {
        return Err(ConfigError::Validation {
            message: "worker.queue-capacity must be at least 1".to_string(),
        });
    }

    if config.python.timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "python.timeout-secs must be at least 1".to_string(),
        });
    }
    if config.python.interpreters.is_empty() {
        return Err(ConfigError::Validation {
            message: "python.interpreters must list at least one command".to_string(),
        });
    }

    if !(config.video.nominal_fps > 0.0) {
        return Err(ConfigError::Validation {
            message: "video.nominal-fps must be positive".to_string(),
        });
    }

    if config.server.bind.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Validation {
            message: format!("server.bind is not a socket address: {}", config.server.bind),
        });
    }

    Ok(())
}
