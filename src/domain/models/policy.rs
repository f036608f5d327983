//! Retention policy domain model.
//!
//! Policies arrive as YAML payloads inside labeled configuration objects:
//! one global object for the whole cluster and at most one namespace object
//! per namespace. The types here are plain serde records; precedence and
//! resolution live in [`crate::services::policy_store`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::workload::WorkloadKind;

/// Fixed name of the global policy object.
pub const GLOBAL_POLICY_NAME: &str = "custodian-global-policy";

/// Fixed name of every namespace policy object.
pub const NAMESPACE_POLICY_NAME: &str = "custodian-namespace-policy";

/// Namespace the controller (and the global policy object) live in.
pub const SYSTEM_NAMESPACE: &str = "custodian-system";

/// Label every policy object must carry, with [`PART_OF_VALUE`].
pub const PART_OF_LABEL: &str = "custodian.io/part-of";
pub const PART_OF_VALUE: &str = "custodian-owner";

/// Label discriminating global from namespace policy objects.
pub const CONFIG_TYPE_LABEL: &str = "custodian.io/config-type";
pub const CONFIG_TYPE_GLOBAL: &str = "global";
pub const CONFIG_TYPE_NAMESPACE: &str = "namespace";

/// Key inside a policy object's data map holding the YAML policy document.
pub const POLICY_PAYLOAD_KEY: &str = "policy";

/// Namespace prefixes reserved for system use; never swept, and namespace
/// policy objects may not live under them.
pub const RESERVED_NAMESPACE_PREFIXES: &[&str] = &["kube-", "openshift-", "custodian-"];

/// Hard ceiling on any TTL when the global policy sets no explicit limit:
/// 30 days, in seconds.
pub const MAX_TTL_SECONDS: i32 = 2_592_000;

/// Hard ceiling on any history limit when the global policy sets none.
pub const MAX_HISTORY_LIMIT: i32 = 100;

/// True when the namespace name carries a reserved prefix.
pub fn is_reserved_namespace(namespace: &str) -> bool {
    RESERVED_NAMESPACE_PREFIXES
        .iter()
        .any(|p| namespace.starts_with(p))
}

/// The retention field being resolved. Success and failure limits share the
/// `historyLimit` fallback; TTL does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyField {
    Ttl,
    SuccessLimit,
    FailureLimit,
}

impl PolicyField {
    /// Field path as it appears in policy documents and error messages.
    pub fn path(self) -> &'static str {
        match self {
            Self::Ttl => "ttlSecondsAfterFinished",
            Self::SuccessLimit => "successfulHistoryLimit",
            Self::FailureLimit => "failedHistoryLimit",
        }
    }

    /// System maximum applied when no explicit global limit exists.
    pub fn maximum(self) -> i32 {
        match self {
            Self::Ttl => MAX_TTL_SECONDS,
            Self::SuccessLimit | Self::FailureLimit => MAX_HISTORY_LIMIT,
        }
    }
}

/// Leaf set of retention knobs; any subset may be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetentionFields {
    pub ttl_seconds_after_finished: Option<i32>,
    /// Fallback for both history sides when the specific field is absent.
    pub history_limit: Option<i32>,
    pub successful_history_limit: Option<i32>,
    pub failed_history_limit: Option<i32>,
}

impl RetentionFields {
    /// Value for `field` within this leaf, applying the `historyLimit`
    /// fallback for the success and failure sides.
    pub fn get(&self, field: PolicyField) -> Option<i32> {
        match field {
            PolicyField::Ttl => self.ttl_seconds_after_finished,
            PolicyField::SuccessLimit => self.successful_history_limit.or(self.history_limit),
            PolicyField::FailureLimit => self.failed_history_limit.or(self.history_limit),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ttl_seconds_after_finished.is_none()
            && self.history_limit.is_none()
            && self.successful_history_limit.is_none()
            && self.failed_history_limit.is_none()
    }
}

/// ALL-of predicate over a workload's metadata. Empty maps assert nothing;
/// an entry with both maps empty matches no workload at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Selector {
    pub match_labels: BTreeMap<String, String>,
    pub match_annotations: BTreeMap<String, String>,
}

impl Selector {
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_annotations.is_empty()
    }
}

/// Fine-grained override within a namespace policy: by exact resource name
/// and/or by selector. Name match always beats selector match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceSpec {
    /// Exact match on the workload's pipeline/task name label.
    pub name: Option<String>,
    /// OR-combined selector entries; empty list means name-only entry.
    pub selector: Vec<Selector>,
    #[serde(flatten)]
    pub fields: RetentionFields,
}

/// Which policy layer is authoritative for a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcedLevel {
    /// Only the global root applies.
    Global,
    /// Namespace roots and resource overrides apply.
    Namespace,
    /// Resource overrides apply but namespace roots are skipped. Internal.
    Resource,
}

impl Default for EnforcedLevel {
    fn default() -> Self {
        Self::Global
    }
}

impl EnforcedLevel {
    pub const VALID: [&'static str; 3] = ["global", "namespace", "resource"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Namespace => "namespace",
            Self::Resource => "resource",
        }
    }
}

/// Per-namespace policy: a namespace-wide default plus ordered override
/// lists for each workload kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NamespaceSpec {
    #[serde(flatten)]
    pub fields: RetentionFields,
    pub enforced_config_level: Option<EnforcedLevel>,
    pub pipeline_runs: Vec<ResourceSpec>,
    pub task_runs: Vec<ResourceSpec>,
}

impl NamespaceSpec {
    pub fn specs(&self, kind: WorkloadKind) -> &[ResourceSpec] {
        match kind {
            WorkloadKind::PipelineRun => &self.pipeline_runs,
            WorkloadKind::TaskRun => &self.task_runs,
        }
    }

    /// Parse a namespace policy payload.
    pub fn from_yaml(payload: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(payload)
    }
}

/// Cluster-wide policy: a global default, an optional enforcement level,
/// and inline namespace entries (root fields and name-only overrides; no
/// selectors — those belong in namespace objects).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalSpec {
    #[serde(flatten)]
    pub fields: RetentionFields,
    pub enforced_config_level: Option<EnforcedLevel>,
    pub namespaces: BTreeMap<String, NamespaceSpec>,
}

impl GlobalSpec {
    /// Parse a global policy payload.
    pub fn from_yaml(payload: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(payload)
    }
}

/// Which policy layer answered a resolver query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolvedFrom {
    /// Global policy root.
    Global,
    /// Inline namespace entry in the global policy.
    Namespace,
    /// Namespace policy object.
    NamespaceConfig,
    /// Name-matched resource override.
    ResourceName,
    /// Selector-matched resource override.
    ResourceSelector,
    /// Nothing matched; the policy is inactive for this query.
    None,
}

impl ResolvedFrom {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Namespace => "ns",
            Self::NamespaceConfig => "ns_configmap",
            Self::ResourceName => "resource_name",
            Self::ResourceSelector => "resource_selector",
            Self::None => "",
        }
    }
}

/// A configuration object as delivered by the configuration store watcher
/// or the admission transport: identifying metadata plus a data map whose
/// [`POLICY_PAYLOAD_KEY`] entry holds the YAML policy document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigObject {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
}

impl ConfigObject {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels: BTreeMap::new(),
            data: BTreeMap::new(),
        }
    }

    /// Global policy object skeleton with the required labels.
    pub fn global() -> Self {
        let mut obj = Self::new(GLOBAL_POLICY_NAME, SYSTEM_NAMESPACE);
        obj.labels
            .insert(PART_OF_LABEL.to_string(), PART_OF_VALUE.to_string());
        obj.labels
            .insert(CONFIG_TYPE_LABEL.to_string(), CONFIG_TYPE_GLOBAL.to_string());
        obj
    }

    /// Namespace policy object skeleton with the required labels.
    pub fn namespaced(namespace: &str) -> Self {
        let mut obj = Self::new(NAMESPACE_POLICY_NAME, namespace);
        obj.labels
            .insert(PART_OF_LABEL.to_string(), PART_OF_VALUE.to_string());
        obj.labels.insert(
            CONFIG_TYPE_LABEL.to_string(),
            CONFIG_TYPE_NAMESPACE.to_string(),
        );
        obj
    }

    #[must_use]
    pub fn with_payload(mut self, yaml: &str) -> Self {
        self.data
            .insert(POLICY_PAYLOAD_KEY.to_string(), yaml.to_string());
        self
    }

    /// Value of the config-type label, if any.
    pub fn config_type(&self) -> Option<&str> {
        self.labels.get(CONFIG_TYPE_LABEL).map(String::as_str)
    }

    /// The YAML policy document, if the payload key is present.
    pub fn payload(&self) -> Option<&str> {
        self.data.get(POLICY_PAYLOAD_KEY).map(String::as_str)
    }
}
