//! Domain models
//!
//! Pure domain entities with business rules and no infrastructure concerns.

pub mod config;
pub mod policy;
pub mod workload;

pub use config::{AdmissionConfig, Config, ControllerConfig, LoggingConfig, SweepConfig};
pub use policy::{
    is_reserved_namespace, ConfigObject, EnforcedLevel, GlobalSpec, NamespaceSpec, PolicyField,
    ResolvedFrom, ResourceSpec, RetentionFields, Selector, CONFIG_TYPE_GLOBAL,
    CONFIG_TYPE_LABEL, CONFIG_TYPE_NAMESPACE, GLOBAL_POLICY_NAME, MAX_HISTORY_LIMIT,
    MAX_TTL_SECONDS, NAMESPACE_POLICY_NAME, PART_OF_LABEL, PART_OF_VALUE, POLICY_PAYLOAD_KEY,
    RESERVED_NAMESPACE_PREFIXES, SYSTEM_NAMESPACE,
};
pub use workload::{
    OwnerRef, RunStatus, Workload, WorkloadKind, PARENT_RUN_LABEL, PIPELINE_NAME_LABEL,
    PROCESSED_ANNOTATION, TASK_NAME_LABEL, TTL_ANNOTATION, TTL_OPT_OUT,
};
