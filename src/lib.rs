//! Custodian - policy-driven retention for completed pipeline workloads.
//!
//! A controller that garbage-collects completed `PipelineRun` and
//! standalone `TaskRun` objects according to declarative retention
//! policies:
//! - per-resource TTL expiry, stamped and tracked via workload annotations
//! - per-bucket history caps with separate successful and failed limits
//! - hierarchical policy resolution (global, namespace, resource overrides)
//! - admission validation of policy objects
//! - configuration-change–triggered cluster sweeps over a worker pool

pub mod adapters;
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use application::{ConfigEvent, Controller};
pub use domain::errors::{ErrorClass, StoreError};
pub use domain::models::{Config, ConfigObject, Workload, WorkloadKind};
pub use services::{PolicyStore, PolicyValidator};
