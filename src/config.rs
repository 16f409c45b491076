use crate::constants::{
    DEFAULT_CLEANER_RETENTION_HOURS, DEFAULT_MAXIMUM_INCOMPLETE_HOURS,
    DEFAULT_MAX_RESULT_PARAM_LENGTH,
};
use crate::error::{ReactorError, Result};

/// Runtime configuration for the reactor core and its periodic jobs.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    pub database_url: String,
    /// Maximum age in hours before an unresolved instruction is declined.
    pub maximum_incomplete_hours: u32,
    /// Retention window in hours for terminal instructions.
    pub cleaner_retention_hours: u32,
    /// Maximum persisted length for a status result-parameter value.
    pub max_result_parameter_length: usize,
    pub execution_poll_interval_ms: u64,
    pub acknowledge_poll_interval_ms: u64,
    pub cleaner_poll_interval_ms: u64,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:reactor.db".to_string(),
            maximum_incomplete_hours: DEFAULT_MAXIMUM_INCOMPLETE_HOURS,
            cleaner_retention_hours: DEFAULT_CLEANER_RETENTION_HOURS,
            max_result_parameter_length: DEFAULT_MAX_RESULT_PARAM_LENGTH,
            execution_poll_interval_ms: 10_000,
            acknowledge_poll_interval_ms: 30_000,
            cleaner_poll_interval_ms: 3_600_000,
        }
    }
}

impl ReactorConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(hours) = std::env::var("REACTOR_MAXIMUM_INCOMPLETE_HOURS") {
            config.maximum_incomplete_hours = hours.parse().map_err(|e| {
                ReactorError::Configuration(format!("Invalid maximum_incomplete_hours: {e}"))
            })?;
        }

        if let Ok(hours) = std::env::var("REACTOR_CLEANER_RETENTION_HOURS") {
            config.cleaner_retention_hours = hours.parse().map_err(|e| {
                ReactorError::Configuration(format!("Invalid cleaner_retention_hours: {e}"))
            })?;
        }

        if let Ok(len) = std::env::var("REACTOR_MAX_RESULT_PARAM_LENGTH") {
            config.max_result_parameter_length = len.parse().map_err(|e| {
                ReactorError::Configuration(format!("Invalid max_result_parameter_length: {e}"))
            })?;
        }

        if let Ok(ms) = std::env::var("REACTOR_EXECUTION_POLL_INTERVAL_MS") {
            config.execution_poll_interval_ms = ms.parse().map_err(|e| {
                ReactorError::Configuration(format!("Invalid execution_poll_interval_ms: {e}"))
            })?;
        }

        if let Ok(ms) = std::env::var("REACTOR_ACKNOWLEDGE_POLL_INTERVAL_MS") {
            config.acknowledge_poll_interval_ms = ms.parse().map_err(|e| {
                ReactorError::Configuration(format!("Invalid acknowledge_poll_interval_ms: {e}"))
            })?;
        }

        if let Ok(ms) = std::env::var("REACTOR_CLEANER_POLL_INTERVAL_MS") {
            config.cleaner_poll_interval_ms = ms.parse().map_err(|e| {
                ReactorError::Configuration(format!("Invalid cleaner_poll_interval_ms: {e}"))
            })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ReactorConfig::default();
        assert_eq!(config.maximum_incomplete_hours, 168);
        assert_eq!(config.cleaner_retention_hours, 72);
        assert_eq!(config.max_result_parameter_length, 1024);
    }
}
