//! Runtime configuration for the controller process.
//!
//! Loaded hierarchically by `infrastructure::config::ConfigLoader`:
//! programmatic defaults, then `custodian.yaml`, then `CUSTODIAN_*`
//! environment variables.

use serde::{Deserialize, Serialize};

/// Main configuration structure for custodian.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Reactor and namespace-scoping settings.
    pub controller: ControllerConfig,

    /// Sweep worker pool settings.
    pub sweep: SweepConfig,

    /// Admission endpoint settings.
    pub admission: AdmissionConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Reactor and scoping settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ControllerConfig {
    /// Comma-separated namespaces to watch; empty means all namespaces.
    pub namespaces: String,

    /// Concurrent workers per reactor (one reactor per workload kind).
    pub reactor_concurrency: usize,

    /// Seconds between full re-observations of the store in local mode.
    pub resync_seconds: u64,
}

const fn default_reactor_concurrency() -> usize {
    4
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespaces: String::new(),
            reactor_concurrency: default_reactor_concurrency(),
            resync_seconds: 300,
        }
    }
}

impl ControllerConfig {
    /// Parsed namespace scoping list; `None` means no scoping.
    pub fn namespace_filter(&self) -> Option<Vec<String>> {
        let names: Vec<String> = self
            .namespaces
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if names.is_empty() {
            None
        } else {
            Some(names)
        }
    }
}

/// Sweep worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SweepConfig {
    /// Number of namespace workers a sweep fans out across.
    pub workers: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { workers: 5 }
    }
}

/// Admission endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct AdmissionConfig {
    pub host: String,
    pub port: u16,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8443,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,

    /// Output format: json or pretty.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}
