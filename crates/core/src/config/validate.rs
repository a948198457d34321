use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Store deadline, retry attempts, subscriber buffer and history window are non-zero
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.dispatch.store_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "dispatch.store_timeout_ms cannot be 0".to_string(),
        ));
    }

    if config.numbering.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "numbering.max_attempts must be at least 1".to_string(),
        ));
    }

    if config.hub.subscriber_buffer == 0 {
        return Err(ConfigError::ValidationError(
            "hub.subscriber_buffer cannot be 0".to_string(),
        ));
    }

    if config.estimator.history_days == 0 {
        return Err(ConfigError::ValidationError(
            "estimator.history_days cannot be 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = Config::default();
        config.server.port = 0;
        let result = validate_config(&config);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_zero_limits_fail() {
        let mut config = Config::default();
        config.dispatch.store_timeout_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.numbering.max_attempts = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.hub.subscriber_buffer = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.estimator.history_days = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("history_days"));
    }
}
