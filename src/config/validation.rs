use crate::config::types::{Config, CrawlerConfig, OutputConfig, StorageConfig, UserAgentConfig};
use crate::ConfigError;
use url::Url;

/// Settings that have no default and must be present in the file
const REQUIRED_SETTINGS: &[(&str, &str)] = &[("crawler", "start-url"), ("storage", "database-path")];

/// Checks that every required setting is present, naming all that are missing
pub fn check_required(table: &toml::Table) -> Result<(), ConfigError> {
    let missing: Vec<String> = REQUIRED_SETTINGS
        .iter()
        .filter(|(section, key)| {
            table
                .get(*section)
                .and_then(|value| value.as_table())
                .and_then(|section| section.get(*key))
                .is_none()
        })
        .map(|(section, key)| format!("{}.{}", section, key))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::MissingSettings(missing))
    }
}

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_storage_config(&config.storage)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    let start_url = Url::parse(&config.start_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid start-url: {}", e)))?;

    if start_url.scheme() != "http" && start_url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "start-url '{}' must use http or https",
            config.start_url
        )));
    }

    if config.catalogue_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "catalogue-path cannot be empty".to_string(),
        ));
    }

    if config.first_page.trim().is_empty() {
        return Err(ConfigError::Validation(
            "first-page cannot be empty".to_string(),
        ));
    }

    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    if config.retry_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "retry-attempts must be >= 1, got {}",
            config.retry_attempts
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "request-timeout-secs must be >= 1, got {}",
            config.request_timeout_secs
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.value.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent value cannot be empty".to_string(),
        ));
    }

    if config.value.chars().any(|c| c.is_control()) {
        return Err(ConfigError::Validation(
            "user-agent value cannot contain control characters".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if let Some(dir) = &config.report_dir {
        if dir.trim().is_empty() {
            return Err(ConfigError::Validation(
                "report-dir cannot be empty when set".to_string(),
            ));
        }
    }

    Ok(())
}
