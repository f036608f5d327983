//! Process infrastructure: configuration loading, logging, metrics.

pub mod config;
pub mod logging;
pub mod metrics;

pub use metrics::Metrics;
