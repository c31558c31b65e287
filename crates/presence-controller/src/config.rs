//! Presence Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default bind address for the combined WebSocket and HTTP listener.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default capacity bound applied when a meeting record carries none.
pub const DEFAULT_MAX_PARTICIPANTS: u32 = 100;

/// Default graceful shutdown deadline in seconds.
pub const DEFAULT_SHUTDOWN_DEADLINE_SECONDS: u64 = 30;

/// Default PC instance ID prefix.
pub const DEFAULT_PC_ID_PREFIX: &str = "pc";

/// Presence Controller configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Redis connection URL (for the meeting directory).
    /// Protected by `SecretString` to prevent accidental logging.
    pub redis_url: SecretString,

    /// Combined WebSocket and HTTP bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Unique identifier for this PC instance.
    pub pc_id: String,

    /// Capacity bound used for meeting records without one of their own.
    pub default_max_participants: u32,

    /// Graceful shutdown deadline in seconds (default: 30).
    pub shutdown_deadline_seconds: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("pc_id", &self.pc_id)
            .field("default_max_participants", &self.default_max_participants)
            .field(
                "shutdown_deadline_seconds",
                &self.shutdown_deadline_seconds,
            )
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = SecretString::from(
            vars.get("PC_REDIS_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("PC_REDIS_URL".to_string()))?
                .clone(),
        );

        let bind_address = vars
            .get("PC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let default_max_participants = match vars.get("PC_DEFAULT_MAX_PARTICIPANTS") {
            Some(raw) => raw.parse().map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "PC_DEFAULT_MAX_PARTICIPANTS must be a positive integer, got '{raw}'"
                ))
            })?,
            None => DEFAULT_MAX_PARTICIPANTS,
        };
        if default_max_participants == 0 {
            return Err(ConfigError::InvalidValue(
                "PC_DEFAULT_MAX_PARTICIPANTS must be at least 1".to_string(),
            ));
        }

        let shutdown_deadline_seconds = match vars.get("PC_SHUTDOWN_DEADLINE_SECONDS") {
            Some(raw) => raw.parse().map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "PC_SHUTDOWN_DEADLINE_SECONDS must be a positive integer, got '{raw}'"
                ))
            })?,
            None => DEFAULT_SHUTDOWN_DEADLINE_SECONDS,
        };

        // Generate PC instance ID
        let pc_id = vars.get("PC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_PC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            redis_url,
            bind_address,
            pc_id,
            default_max_participants,
            shutdown_deadline_seconds,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "PC_REDIS_URL".to_string(),
            "redis://localhost:6379".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = base_vars();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.redis_url.expose_secret(), "redis://localhost:6379");
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.default_max_participants, DEFAULT_MAX_PARTICIPANTS);
        assert_eq!(
            config.shutdown_deadline_seconds,
            DEFAULT_SHUTDOWN_DEADLINE_SECONDS
        );
        // PC ID should be auto-generated
        assert!(config.pc_id.starts_with("pc-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("PC_BIND_ADDRESS".to_string(), "127.0.0.1:9090".to_string());
        vars.insert("PC_DEFAULT_MAX_PARTICIPANTS".to_string(), "25".to_string());
        vars.insert("PC_SHUTDOWN_DEADLINE_SECONDS".to_string(), "10".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:9090");
        assert_eq!(config.default_max_participants, 25);
        assert_eq!(config.shutdown_deadline_seconds, 10);
    }

    #[test]
    fn test_pc_id_custom_value() {
        let mut vars = base_vars();
        vars.insert("PC_ID".to_string(), "pc-custom-001".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.pc_id, "pc-custom-001");
    }

    #[test]
    fn test_from_vars_missing_redis_url() {
        let vars = HashMap::new();

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "PC_REDIS_URL"));
    }

    #[test]
    fn test_from_vars_rejects_zero_capacity_default() {
        let mut vars = base_vars();
        vars.insert("PC_DEFAULT_MAX_PARTICIPANTS".to_string(), "0".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_from_vars_rejects_unparseable_capacity() {
        let mut vars = base_vars();
        vars.insert(
            "PC_DEFAULT_MAX_PARTICIPANTS".to_string(),
            "many".to_string(),
        );

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let vars = base_vars();
        let config = Config::from_vars(&vars).expect("Config should load successfully");

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("redis://"));
    }
}
