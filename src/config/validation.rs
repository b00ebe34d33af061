use crate::config::types::{Config, HttpConfig, SchedulerConfig};
use crate::ConfigError;

const MAX_WORKERS: usize = 64;
const MAX_INTERVAL_MS: u64 = 60 * 60 * 1000;
const MAX_TIMEOUT_SECS: u64 = 300;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_http_config(&config.http)?;
    Ok(())
}

fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > MAX_WORKERS {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and {}, got {}",
            MAX_WORKERS, config.workers
        )));
    }

    if config.interval_ms > MAX_INTERVAL_MS {
        return Err(ConfigError::Validation(format!(
            "interval-ms must be <= {}ms, got {}ms",
            MAX_INTERVAL_MS, config.interval_ms
        )));
    }

    Ok(())
}

fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.user_agent.chars().any(char::is_control) {
        return Err(ConfigError::Validation(
            "user-agent cannot contain control characters".to_string(),
        ));
    }

    if config.timeout_secs < 1 || config.timeout_secs > MAX_TIMEOUT_SECS {
        return Err(ConfigError::Validation(format!(
            "timeout-secs must be between 1 and {}, got {}",
            MAX_TIMEOUT_SECS, config.timeout_secs
        )));
    }

    if let Some(dir) = &config.cache_dir {
        if dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "cache-dir cannot be an empty path; use None to disable caching".to_string(),
            ));
        }
    }

    Ok(())
}
