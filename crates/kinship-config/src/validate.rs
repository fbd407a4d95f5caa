//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_keys(config)?;
    validate_sizes(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_keys(config: &Config) -> ConfigResult<()> {
    let k = &config.keys;
    if k.delimiter.is_empty() {
        return Err(invalid("keys.delimiter", "delimiter must not be empty"));
    }
    for (field, value) in [("keys.suffix", &k.suffix), ("keys.instances", &k.instances)] {
        if value.is_empty() {
            return Err(invalid(field, "segment must not be empty"));
        }
        if value.contains(k.delimiter.as_str()) {
            return Err(invalid(
                field,
                format!("segment '{value}' must not contain the delimiter '{}'", k.delimiter),
            ));
        }
    }
    if k.suffix == k.instances {
        return Err(invalid(
            "keys.instances",
            "timeline segment must differ from the record suffix",
        ));
    }
    Ok(())
}

fn validate_sizes(config: &Config) -> ConfigResult<()> {
    let sizes = [
        ("audit.batch_size", config.audit.batch_size),
        ("audit.sample_size", config.audit.sample_size),
        ("repair.batch_size", config.repair.batch_size),
    ];
    for (field, value) in sizes {
        if value == 0 {
            return Err(invalid(field, "must be greater than zero"));
        }
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = Config::default();
        config.audit.batch_size = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("audit.batch_size"));
    }

    #[test]
    fn test_suffix_containing_delimiter_rejected() {
        let mut config = Config::default();
        config.keys.suffix = "obj:ect".to_owned();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_suffix_equal_to_instances_rejected() {
        let mut config = Config::default();
        config.keys.instances = "object".to_owned();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let mut config = Config::default();
        config.logging.format = "xml".to_owned();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_rebuild_threshold_allowed() {
        let mut config = Config::default();
        config.repair.rebuild_threshold = 0;
        assert!(validate(&config).is_ok());
    }
}
