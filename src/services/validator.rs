//! Policy object validation.
//!
//! One total rule list applied both by the admission endpoint and again by
//! the configuration store on load. Label and scope rules (L1..L3) inspect
//! object metadata; value rules (V1..V6) inspect the parsed payload; the
//! deletion rule (V7) protects the global object while namespace policies
//! depend on it.

use std::sync::Arc;

use thiserror::Error;

use crate::domain::models::{
    is_reserved_namespace, ConfigObject, EnforcedLevel, GlobalSpec, NamespaceSpec, PolicyField,
    ResourceSpec, RetentionFields, CONFIG_TYPE_GLOBAL, CONFIG_TYPE_LABEL, CONFIG_TYPE_NAMESPACE,
    GLOBAL_POLICY_NAME, NAMESPACE_POLICY_NAME, PART_OF_LABEL, PART_OF_VALUE, SYSTEM_NAMESPACE,
};
use crate::services::policy_store::PolicyStore;

/// Classification code attached to every rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationCode {
    Parse,
    Schema,
    CrossField,
    Scope,
    SelectorInGlobal,
    LimitExceeded,
    DeleteWithDependents,
}

impl ValidationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Schema => "schema",
            Self::CrossField => "cross-field",
            Self::Scope => "scope",
            Self::SelectorInGlobal => "selector-in-global",
            Self::LimitExceeded => "limit-exceeded",
            Self::DeleteWithDependents => "delete-with-dependents",
        }
    }
}

/// A rejected policy object, citing the offending field path and rule.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The payload is not a parsable policy document.
    #[error("failed to parse policy payload: {0}")]
    Parse(String),

    /// The data map carries no policy payload.
    #[error("policy object carries no '{0}' payload key")]
    MissingPayload(String),

    /// L1: a required identifying label is missing or has the wrong value.
    #[error("metadata.labels.{key}: must be set to {expected:?}")]
    Label { key: String, expected: String },

    /// L2: the global object is misnamed or lives outside the system
    /// namespace.
    #[error("global policy object must be named {name:?} in namespace {namespace:?}")]
    GlobalScope { name: String, namespace: String },

    /// L3: the namespace object carries the wrong reserved name.
    #[error("namespace policy object must be named {expected:?}")]
    NamespaceScope { expected: String },

    /// L3: namespace policy objects may not live in system namespaces.
    #[error("namespace {0:?} is reserved for system use")]
    ReservedNamespace(String),

    /// V1: retention values must be non-negative.
    #[error("{path}: must not be negative (got {value})")]
    Negative { path: String, value: i32 },

    /// V2: unknown enforcement level.
    #[error("{path}: must be one of global, namespace, resource (got {value:?})")]
    InvalidLevel { path: String, value: String },

    /// V3: selector entries are rejected inside the global object.
    #[error("{path}: selectors are not allowed in the global policy object")]
    SelectorInGlobal { path: String },

    /// V4: a selector entry must constrain something.
    #[error("{path}: selector entry must set matchLabels or matchAnnotations")]
    EmptySelector { path: String },

    /// V5: namespace values may not exceed the global limit.
    #[error("{path}: cannot exceed global limit ({limit})")]
    ExceedsGlobal { path: String, limit: i32 },

    /// V6: with no global limit, system maxima apply.
    #[error("{path}: cannot exceed system maximum ({limit})")]
    ExceedsMaximum { path: String, limit: i32 },

    /// V7: the global object is load-bearing while namespace objects exist.
    #[error("global policy cannot be deleted while {0} namespace policy object(s) exist")]
    DeleteBlocked(usize),
}

impl ValidationError {
    pub fn code(&self) -> ValidationCode {
        match self {
            Self::Parse(_) => ValidationCode::Parse,
            Self::MissingPayload(_) => ValidationCode::Schema,
            Self::Label { .. }
            | Self::GlobalScope { .. }
            | Self::NamespaceScope { .. }
            | Self::ReservedNamespace(_) => ValidationCode::Scope,
            Self::Negative { .. } | Self::InvalidLevel { .. } => ValidationCode::CrossField,
            Self::SelectorInGlobal { .. } => ValidationCode::SelectorInGlobal,
            Self::EmptySelector { .. } => ValidationCode::Schema,
            Self::ExceedsGlobal { .. } | Self::ExceedsMaximum { .. } => {
                ValidationCode::LimitExceeded
            }
            Self::DeleteBlocked(_) => ValidationCode::DeleteWithDependents,
        }
    }
}

/// V1 over one leaf, at the given document path.
fn check_non_negative(path: &str, fields: &RetentionFields) -> Result<(), ValidationError> {
    let checks = [
        ("ttlSecondsAfterFinished", fields.ttl_seconds_after_finished),
        ("historyLimit", fields.history_limit),
        ("successfulHistoryLimit", fields.successful_history_limit),
        ("failedHistoryLimit", fields.failed_history_limit),
    ];
    for (field, value) in checks {
        if let Some(value) = value {
            if value < 0 {
                return Err(ValidationError::Negative {
                    path: join(path, field),
                    value,
                });
            }
        }
    }
    Ok(())
}

/// V2 applies before typed parsing: pull the raw level strings out of the
/// document so an unknown value rejects with its field path instead of an
/// opaque parse error.
fn check_level_strings(payload: &str) -> Result<(), ValidationError> {
    let doc: serde_yaml::Value = match serde_yaml::from_str(payload) {
        Ok(doc) => doc,
        // Unparsable documents are handled by the typed parse path.
        Err(_) => return Ok(()),
    };

    check_level_at("enforcedConfigLevel", doc.get("enforcedConfigLevel"))?;
    if let Some(namespaces) = doc.get("namespaces").and_then(|v| v.as_mapping()) {
        for (ns, spec) in namespaces {
            let ns = ns.as_str().unwrap_or_default();
            check_level_at(
                &format!("namespaces.{ns}.enforcedConfigLevel"),
                spec.get("enforcedConfigLevel"),
            )?;
        }
    }
    Ok(())
}

fn check_level_at(path: &str, value: Option<&serde_yaml::Value>) -> Result<(), ValidationError> {
    if let Some(value) = value {
        let text = value.as_str().unwrap_or_default();
        if !EnforcedLevel::VALID.contains(&text) {
            return Err(ValidationError::InvalidLevel {
                path: path.to_string(),
                value: text.to_string(),
            });
        }
    }
    Ok(())
}

/// V4 over one resource spec's selector list.
fn check_selectors(path: &str, spec: &ResourceSpec) -> Result<(), ValidationError> {
    for (idx, entry) in spec.selector.iter().enumerate() {
        if entry.is_empty() {
            return Err(ValidationError::EmptySelector {
                path: format!("{path}.selector[{idx}]"),
            });
        }
    }
    Ok(())
}

/// V5/V6 over one leaf: every present value must fit under the effective
/// ceiling — the global value for the field (with `historyLimit` capping
/// the granular sides) or, absent that, the system maximum.
fn check_against_limits(
    path: &str,
    fields: &RetentionFields,
    global: Option<&GlobalSpec>,
) -> Result<(), ValidationError> {
    let field_checks = [
        (PolicyField::Ttl, fields.ttl_seconds_after_finished),
        (PolicyField::SuccessLimit, fields.successful_history_limit),
        (PolicyField::FailureLimit, fields.failed_history_limit),
    ];
    for (field, value) in field_checks {
        if let Some(value) = value {
            check_ceiling(&join(path, field.path()), value, field, global)?;
        }
    }
    if let Some(value) = fields.history_limit {
        // The bare fallback stands in for both sides, so it must fit under
        // both ceilings.
        for field in [PolicyField::SuccessLimit, PolicyField::FailureLimit] {
            check_ceiling(&join(path, "historyLimit"), value, field, global)?;
        }
    }
    Ok(())
}

fn check_ceiling(
    path: &str,
    value: i32,
    field: PolicyField,
    global: Option<&GlobalSpec>,
) -> Result<(), ValidationError> {
    match global.and_then(|g| g.fields.get(field)) {
        Some(limit) if value > limit => Err(ValidationError::ExceedsGlobal {
            path: path.to_string(),
            limit,
        }),
        Some(_) => Ok(()),
        None if value > field.maximum() => Err(ValidationError::ExceedsMaximum {
            path: path.to_string(),
            limit: field.maximum(),
        }),
        None => Ok(()),
    }
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

/// Value rules over a parsed global policy: V1 everywhere, V3 on inline
/// namespace entries.
pub fn validate_global_spec(spec: &GlobalSpec) -> Result<(), ValidationError> {
    check_non_negative("", &spec.fields)?;
    for (ns, ns_spec) in &spec.namespaces {
        let base = format!("namespaces.{ns}");
        check_non_negative(&base, &ns_spec.fields)?;
        for (kind_key, resources) in [
            ("pipelineRuns", &ns_spec.pipeline_runs),
            ("taskRuns", &ns_spec.task_runs),
        ] {
            for (idx, resource) in resources.iter().enumerate() {
                let path = format!("{base}.{kind_key}[{idx}]");
                check_non_negative(&path, &resource.fields)?;
                if !resource.selector.is_empty() {
                    return Err(ValidationError::SelectorInGlobal {
                        path: format!("{path}.selector"),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Value rules over a parsed namespace policy: V1, V4, and V5/V6 against
/// the given global policy (or the system maxima without one).
pub fn validate_namespace_spec(
    spec: &NamespaceSpec,
    global: Option<&GlobalSpec>,
) -> Result<(), ValidationError> {
    check_non_negative("", &spec.fields)?;
    check_against_limits("", &spec.fields, global)?;
    for (kind_key, resources) in [
        ("pipelineRuns", &spec.pipeline_runs),
        ("taskRuns", &spec.task_runs),
    ] {
        for (idx, resource) in resources.iter().enumerate() {
            let path = format!("{kind_key}[{idx}]");
            check_non_negative(&path, &resource.fields)?;
            check_selectors(&path, resource)?;
            check_against_limits(&path, &resource.fields, global)?;
        }
    }
    Ok(())
}

/// Stateless rule application over configuration objects, consulting the
/// configuration store for cross-object rules (V5, V7).
pub struct PolicyValidator {
    store: Arc<PolicyStore>,
}

impl PolicyValidator {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    /// Full CREATE/UPDATE validation of a configuration object.
    pub fn validate_object(&self, obj: &ConfigObject) -> Result<(), ValidationError> {
        match self.check_labels(obj)? {
            ConfigKind::Global => self.validate_global_object(obj),
            ConfigKind::Namespace => self.validate_namespace_object(obj),
        }
    }

    /// DELETE validation. Namespace object deletion is unconditional; the
    /// global object is protected while namespace objects exist (V7).
    pub fn validate_delete(&self, obj: &ConfigObject) -> Result<(), ValidationError> {
        if obj.config_type() == Some(CONFIG_TYPE_GLOBAL) {
            let dependents = self.store.namespace_policy_count();
            if dependents > 0 {
                return Err(ValidationError::DeleteBlocked(dependents));
            }
        }
        Ok(())
    }

    fn check_labels(&self, obj: &ConfigObject) -> Result<ConfigKind, ValidationError> {
        if obj.labels.get(PART_OF_LABEL).map(String::as_str) != Some(PART_OF_VALUE) {
            return Err(ValidationError::Label {
                key: PART_OF_LABEL.to_string(),
                expected: PART_OF_VALUE.to_string(),
            });
        }
        match obj.labels.get(CONFIG_TYPE_LABEL).map(String::as_str) {
            Some(CONFIG_TYPE_GLOBAL) => Ok(ConfigKind::Global),
            Some(CONFIG_TYPE_NAMESPACE) => Ok(ConfigKind::Namespace),
            _ => Err(ValidationError::Label {
                key: CONFIG_TYPE_LABEL.to_string(),
                expected: format!("{CONFIG_TYPE_GLOBAL} or {CONFIG_TYPE_NAMESPACE}"),
            }),
        }
    }

    fn validate_global_object(&self, obj: &ConfigObject) -> Result<(), ValidationError> {
        if obj.name != GLOBAL_POLICY_NAME || obj.namespace != SYSTEM_NAMESPACE {
            return Err(ValidationError::GlobalScope {
                name: GLOBAL_POLICY_NAME.to_string(),
                namespace: SYSTEM_NAMESPACE.to_string(),
            });
        }
        let payload = parse_payload(obj)?;
        check_level_strings(payload)?;
        let spec =
            GlobalSpec::from_yaml(payload).map_err(|e| ValidationError::Parse(e.to_string()))?;
        validate_global_spec(&spec)
    }

    fn validate_namespace_object(&self, obj: &ConfigObject) -> Result<(), ValidationError> {
        if obj.name != NAMESPACE_POLICY_NAME {
            return Err(ValidationError::NamespaceScope {
                expected: NAMESPACE_POLICY_NAME.to_string(),
            });
        }
        if is_reserved_namespace(&obj.namespace) {
            return Err(ValidationError::ReservedNamespace(obj.namespace.clone()));
        }
        let payload = parse_payload(obj)?;
        check_level_strings(payload)?;
        let spec =
            NamespaceSpec::from_yaml(payload).map_err(|e| ValidationError::Parse(e.to_string()))?;
        let global = self.store.global_snapshot();
        validate_namespace_spec(&spec, global.as_ref())
    }
}

enum ConfigKind {
    Global,
    Namespace,
}

fn parse_payload(obj: &ConfigObject) -> Result<&str, ValidationError> {
    obj.payload().ok_or_else(|| {
        ValidationError::MissingPayload(crate::domain::models::POLICY_PAYLOAD_KEY.to_string())
    })
}
