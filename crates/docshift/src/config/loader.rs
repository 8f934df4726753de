use std::net::SocketAddr;
use std::path::Path;

use crate::config::schema::{ServerConfig, CONFIG_VERSION};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// Names a JSON config file; defaults are used when unset.
pub const CONFIG_PATH_ENV: &str = "DOCSHIFT_CONFIG";
/// Full `host:port` override for the bind address.
pub const BIND_ENV: &str = "DOCSHIFT_BIND";
/// Port-only override, kept for hosting platforms that inject `PORT`.
pub const PORT_ENV: &str = "PORT";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServerConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ServerConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: ServerConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Loads the configuration named by `DOCSHIFT_CONFIG` (or defaults) and
/// applies environment overrides.
pub fn load_from_env() -> Result<ServerConfig, ConfigError> {
    let lookup = |key: &str| std::env::var(key).ok();
    let config = match lookup(CONFIG_PATH_ENV) {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    apply_overrides(config, lookup)
}

/// Applies `DOCSHIFT_BIND` / `PORT` from `lookup` on top of `config`.
pub fn apply_overrides<F>(mut config: ServerConfig, lookup: F) -> Result<ServerConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(bind) = lookup(BIND_ENV) {
        config.bind_address = bind.parse::<SocketAddr>().map_err(|e| ConfigError::Validation {
            message: format!("{} '{}' is not a socket address: {}", BIND_ENV, bind, e),
        })?;
    } else if let Some(port) = lookup(PORT_ENV) {
        let port = port.parse::<u16>().map_err(|e| ConfigError::Validation {
            message: format!("{} '{}' is not a port number: {}", PORT_ENV, port, e),
        })?;
        config.bind_address.set_port(port);
    }

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

fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.max_file_size_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "max_file_size_bytes must be greater than 0".to_string(),
        });
    }

    if config.max_batch_files == 0 {
        return Err(ConfigError::Validation {
            message: "max_batch_files must be greater than 0".to_string(),
        });
    }

    if config.concurrency == 0 {
        return Err(ConfigError::Validation {
            message: "concurrency must be greater than 0".to_string(),
        });
    }

    if config.cleanup.retention_secs == 0 || config.cleanup.interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "cleanup retention and interval must be greater than 0".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;
    use std::collections::HashMap;

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();
        assert_eq!(config.max_batch_files, 20);
        assert_eq!(config.max_file_size_bytes, 50 * 1024 * 1024);
        assert_eq!(config.bind_address.port(), 5000);
        assert_eq!(config.cleanup.retention_secs, 3600);
        assert_eq!(config.cleanup.interval_secs, 1800);
        assert!(config.concurrency >= 1);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "bind_address": "127.0.0.1:8080",
            "scratch_directory": "/var/tmp/docshift",
            "max_file_size_bytes": 1048576,
            "max_batch_files": 5,
            "concurrency": 2,
            "cleanup": { "retention_secs": 60, "interval_secs": 30 },
            "logging": { "level": "debug", "format": "json" },
            "cors": { "allowed_origins": ["http://localhost:5173"] }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.max_batch_files, 5);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.cors.allowed_origins.len(), 1);
    }

    #[test]
    fn test_schema_rejects_unknown_field() {
        let result = load_config_from_str(r#"{ "version": "1.0", "workers": 4 }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_schema_rejects_zero_batch_size() {
        let result = load_config_from_str(r#"{ "version": "1.0", "max_batch_files": 0 }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_unsupported_version() {
        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        match result {
            Err(ConfigError::Validation { message }) => {
                assert!(message.contains("Unsupported config version"));
            }
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_json() {
        let result = load_config_from_str("{ not json");
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_config("/nonexistent/docshift.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_port_override() {
        let env: HashMap<&str, &str> = HashMap::from([(PORT_ENV, "7001")]);
        let config =
            apply_overrides(ServerConfig::default(), |k| env.get(k).map(|v| v.to_string()))
                .unwrap();
        assert_eq!(config.bind_address.port(), 7001);
    }

    #[test]
    fn test_bind_override_wins_over_port() {
        let env: HashMap<&str, &str> =
            HashMap::from([(BIND_ENV, "127.0.0.1:9000"), (PORT_ENV, "7001")]);
        let config =
            apply_overrides(ServerConfig::default(), |k| env.get(k).map(|v| v.to_string()))
                .unwrap();
        assert_eq!(config.bind_address.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn test_bad_port_override() {
        let env: HashMap<&str, &str> = HashMap::from([(PORT_ENV, "http")]);
        let result =
            apply_overrides(ServerConfig::default(), |k| env.get(k).map(|v| v.to_string()));
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }
}
