use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Both queue concurrencies are at least 1
/// - Runner thread count is at least 1
/// - A configured timeout is not 0
/// - Every engine names an estimator and a renderer
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.session.estimation_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "session.estimation_concurrency cannot be 0".to_string(),
        ));
    }
    if config.session.render_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "session.render_concurrency cannot be 0".to_string(),
        ));
    }

    if config.runner.threads == 0 {
        return Err(ConfigError::ValidationError(
            "runner.threads cannot be 0".to_string(),
        ));
    }
    if config.runner.timeout_secs == Some(0) {
        return Err(ConfigError::ValidationError(
            "runner.timeout_secs cannot be 0 (omit it to disable the timeout)".to_string(),
        ));
    }

    for (name, commands) in [("v1", &config.runner.v1), ("v2", &config.runner.v2)] {
        if commands.estimator.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "runner.{}.estimator cannot be empty",
                name
            )));
        }
        if commands.renderer.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "runner.{}.renderer cannot be empty",
                name
            )));
        }
    }

    Ok(())
}
