use super::types::*;
use crate::config::{env_var_pattern, expand_env_vars, expand_tilde};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate a config document.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    config.storage.path = expand_tilde(&config.storage.path);
    config.platform.site_url = config
        .platform
        .site_url
        .take()
        .map(|url| url.trim().trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty());

    validate_config(&config)?;
    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let mut unexpanded_vars: Vec<String> = env_var_pattern()
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}\n\
         Set them (e.g. export {}=...) or replace them in the config file",
        unexpanded_vars.join(", "),
        unexpanded_vars[0]
    )))
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.export.batch_size == 0 {
        errors.push("export.batch_size must be greater than 0".to_string());
    }
    if config.export.max_batches_per_run == 0 {
        errors.push("export.max_batches_per_run must be greater than 0".to_string());
    }
    if config.export.interval.is_zero() {
        errors.push("export.interval must be greater than 0".to_string());
    }
    if config.shipper.timeout.is_zero() {
        errors.push("shipper.timeout must be greater than 0".to_string());
    }
    if config.report.timeout.is_zero() {
        errors.push("report.timeout must be greater than 0".to_string());
    }

    // A lock that expires mid-run lets the next trigger start a second run
    let worst_case_run = config
        .shipper
        .timeout
        .saturating_mul(config.export.max_batches_per_run.min(u32::MAX as usize) as u32);
    if config.export.lock.ttl <= worst_case_run {
        errors.push(format!(
            "export.lock.ttl ({:?}) must exceed max_batches_per_run × shipper.timeout ({:?})",
            config.export.lock.ttl, worst_case_run
        ));
    }

    if config.export.lock.wait >= config.export.lock.ttl {
        errors.push(format!(
            "export.lock.wait ({:?}) must be less than export.lock.ttl ({:?})",
            config.export.lock.wait, config.export.lock.ttl
        ));
    }

    if config.platform.lang.trim().is_empty() {
        errors.push("platform.lang must not be empty".to_string());
    }
    if let Some(url) = &config.platform.site_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(format!(
                "platform.site_url must start with http:// or https://, got '{}'",
                url
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}
