//! Hierarchical configuration loading.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid sweep.workers: {0}. Must be at least 1")]
    InvalidSweepWorkers(usize),

    #[error("Invalid controller.reactor_concurrency: {0}. Must be at least 1")]
    InvalidReactorConcurrency(usize),

    #[error("Invalid logging.level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid logging.format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid admission.port: 0")]
    InvalidAdmissionPort,
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. custodian.yaml in the working directory
    /// 3. Environment variables (`CUSTODIAN_*` prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("custodian.yaml"))
            .merge(Env::prefixed("CUSTODIAN_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("CUSTODIAN_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.sweep.workers == 0 {
            return Err(ConfigError::InvalidSweepWorkers(config.sweep.workers));
        }
        if config.controller.reactor_concurrency == 0 {
            return Err(ConfigError::InvalidReactorConcurrency(
                config.controller.reactor_concurrency,
            ));
        }
        if !["trace", "debug", "info", "warn", "error"]
            .contains(&config.logging.level.to_lowercase().as_str())
        {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        if !["json", "pretty"].contains(&config.logging.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        if config.admission.port == 0 {
            return Err(ConfigError::InvalidAdmissionPort);
        }
        Ok(())
    }
}
