//! In-memory configuration store and hierarchical policy resolution.
//!
//! Holds one global policy and a map of per-namespace policies behind a
//! read/write lock. Loads replace the stored policy atomically and only
//! after the payload parses and validates; a failed load leaves the prior
//! policy intact. Resolution is a pure function over the locked snapshot:
//! tagged layers composed by explicit precedence rules, not an inheritance
//! hierarchy.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::domain::models::{
    ConfigObject, EnforcedLevel, GlobalSpec, NamespaceSpec, PolicyField, ResolvedFrom,
    ResourceSpec, Selector, Workload, WorkloadKind,
};
use crate::services::selector::matching_entry;
use crate::services::validator::{self, ValidationError};

/// Why a policy object could not be loaded into the store.
#[derive(Debug, Error)]
pub enum PolicyLoadError {
    /// The object's data map has no policy payload key.
    #[error("policy object carries no payload")]
    MissingPayload,

    /// The YAML document did not parse into the policy schema.
    #[error("failed to parse policy payload: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The payload parsed but violated a validation rule.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// A resolver query: the workload attributes policy resolution keys on.
///
/// `name` is the value of the workload's pipeline/task name label (the
/// target of `ResourceSpec.name` matching), not the run's own object name.
#[derive(Debug, Clone, Copy)]
pub struct PolicyQuery<'a> {
    pub kind: WorkloadKind,
    pub namespace: &'a str,
    pub name: &'a str,
    pub labels: &'a BTreeMap<String, String>,
    pub annotations: &'a BTreeMap<String, String>,
}

impl<'a> PolicyQuery<'a> {
    pub fn for_workload(workload: &'a Workload) -> Self {
        Self {
            kind: workload.kind,
            namespace: &workload.namespace,
            name: workload.default_name().unwrap_or(""),
            labels: &workload.labels,
            annotations: &workload.annotations,
        }
    }
}

#[derive(Debug, Default)]
struct PolicyState {
    global: Option<GlobalSpec>,
    /// Policies loaded from namespace configuration objects, by namespace.
    namespaces: HashMap<String, NamespaceSpec>,
    /// Set whenever the global object changes; sweeps invalidate processed
    /// annotations older than this.
    revision: Option<DateTime<Utc>>,
}

/// Lock-protected, read-mostly cache of the retention policy hierarchy.
#[derive(Debug, Default)]
pub struct PolicyStore {
    inner: RwLock<PolicyState>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, PolicyState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PolicyState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parse, validate, and atomically install the global policy. Bumps the
    /// policy revision to `now` on success.
    pub fn load_global(
        &self,
        obj: &ConfigObject,
        now: DateTime<Utc>,
    ) -> Result<(), PolicyLoadError> {
        let payload = obj.payload().ok_or(PolicyLoadError::MissingPayload)?;
        let spec = GlobalSpec::from_yaml(payload)?;
        validator::validate_global_spec(&spec)?;

        let mut state = self.write();
        state.global = Some(spec);
        state.revision = Some(now);
        info!(revision = %now, "loaded global retention policy");
        Ok(())
    }

    /// Parse, validate, and install the policy for one namespace. The same
    /// rules the admission endpoint applies run again here, so a payload
    /// that slipped past admission cannot poison the store.
    pub fn load_namespace(&self, namespace: &str, obj: &ConfigObject) -> Result<(), PolicyLoadError> {
        let payload = obj.payload().ok_or(PolicyLoadError::MissingPayload)?;
        let spec = NamespaceSpec::from_yaml(payload)?;

        let global = self.read().global.clone();
        validator::validate_namespace_spec(&spec, global.as_ref())?;

        let mut state = self.write();
        state.namespaces.insert(namespace.to_string(), spec);
        info!(namespace, "loaded namespace retention policy");
        Ok(())
    }

    /// Drop the policy for one namespace.
    pub fn delete_namespace(&self, namespace: &str) {
        let removed = self.write().namespaces.remove(namespace).is_some();
        if removed {
            info!(namespace, "removed namespace retention policy");
        }
    }

    /// Drop the global policy. Admission normally blocks this while
    /// namespace policies exist; the watcher may still deliver it.
    pub fn delete_global(&self, now: DateTime<Utc>) {
        let mut state = self.write();
        state.global = None;
        state.revision = Some(now);
        info!("removed global retention policy");
    }

    /// Timestamp of the last global policy change.
    pub fn revision(&self) -> Option<DateTime<Utc>> {
        self.read().revision
    }

    /// Clone of the stored global policy, for cross-object validation.
    pub fn global_snapshot(&self) -> Option<GlobalSpec> {
        self.read().global.clone()
    }

    /// Number of namespace policy objects currently loaded.
    pub fn namespace_policy_count(&self) -> usize {
        self.read().namespaces.len()
    }

    /// Effective TTL for the workload, with the layer that supplied it.
    pub fn ttl(&self, query: &PolicyQuery<'_>) -> (Option<i32>, ResolvedFrom) {
        self.resolve_field(query, PolicyField::Ttl)
    }

    /// Effective successful-history limit for the workload.
    pub fn success_limit(&self, query: &PolicyQuery<'_>) -> (Option<i32>, ResolvedFrom) {
        self.resolve_field(query, PolicyField::SuccessLimit)
    }

    /// Effective failed-history limit for the workload.
    pub fn failure_limit(&self, query: &PolicyQuery<'_>) -> (Option<i32>, ResolvedFrom) {
        self.resolve_field(query, PolicyField::FailureLimit)
    }

    /// Effective enforcement level for the workload's namespace.
    ///
    /// Precedence: namespace object value, then the global object's inline
    /// entry for the namespace, then the global root, then `global`.
    pub fn enforced_level(&self, query: &PolicyQuery<'_>) -> (EnforcedLevel, ResolvedFrom) {
        let state = self.read();
        Self::level_of(&state, query.namespace)
    }

    /// The selector entry the workload matches under its policy, if any.
    /// The history limiter uses this copy to scope its bucket listing.
    pub fn matching_selector(&self, query: &PolicyQuery<'_>) -> Option<Selector> {
        let state = self.read();
        let (level, _) = Self::level_of(&state, query.namespace);
        if level == EnforcedLevel::Global {
            return None;
        }

        for (spec, _) in Self::namespace_layers(&state, query.namespace) {
            for resource in spec.specs(query.kind) {
                if let Some(entry) =
                    matching_entry(&resource.selector, query.labels, query.annotations)
                {
                    return Some(entry.clone());
                }
            }
        }
        None
    }

    fn level_of(state: &PolicyState, namespace: &str) -> (EnforcedLevel, ResolvedFrom) {
        if let Some(level) = state
            .namespaces
            .get(namespace)
            .and_then(|spec| spec.enforced_config_level)
        {
            return (level, ResolvedFrom::NamespaceConfig);
        }
        if let Some(global) = &state.global {
            if let Some(level) = global
                .namespaces
                .get(namespace)
                .and_then(|spec| spec.enforced_config_level)
            {
                return (level, ResolvedFrom::Namespace);
            }
            if let Some(level) = global.enforced_config_level {
                return (level, ResolvedFrom::Global);
            }
        }
        (EnforcedLevel::Global, ResolvedFrom::None)
    }

    /// Namespace-scoped policy layers in precedence order: the namespace's
    /// own configuration object first, then the global object's inline
    /// entry for it.
    fn namespace_layers<'s>(
        state: &'s PolicyState,
        namespace: &str,
    ) -> impl Iterator<Item = (&'s NamespaceSpec, ResolvedFrom)> {
        let from_config = state
            .namespaces
            .get(namespace)
            .map(|spec| (spec, ResolvedFrom::NamespaceConfig));
        let inline = state
            .global
            .as_ref()
            .and_then(|global| global.namespaces.get(namespace))
            .map(|spec| (spec, ResolvedFrom::Namespace));
        from_config.into_iter().chain(inline)
    }

    fn resolve_field(
        &self,
        query: &PolicyQuery<'_>,
        field: PolicyField,
    ) -> (Option<i32>, ResolvedFrom) {
        let state = self.read();
        let (level, _) = Self::level_of(&state, query.namespace);

        if level == EnforcedLevel::Global {
            return Self::global_root(&state, field);
        }

        for (spec, layer) in Self::namespace_layers(&state, query.namespace) {
            // Exact name match has absolute precedence over selectors. An
            // entry that matched but carries no opinion on this field falls
            // through rather than masking lower layers.
            if !query.name.is_empty() {
                let by_name = spec
                    .specs(query.kind)
                    .iter()
                    .find(|resource| resource.name.as_deref() == Some(query.name));
                if let Some(value) = by_name.and_then(|resource| resource.fields.get(field)) {
                    return (Some(cap(value, field)), ResolvedFrom::ResourceName);
                }
            }

            if let Some(resource) = Self::first_selector_match(spec, query) {
                if let Some(value) = resource.fields.get(field) {
                    return (Some(cap(value, field)), ResolvedFrom::ResourceSelector);
                }
            }

            // Resource-level enforcement skips namespace roots entirely.
            if level != EnforcedLevel::Resource {
                if let Some(value) = spec.fields.get(field) {
                    return (Some(cap(value, field)), layer);
                }
            }
        }

        Self::global_root(&state, field)
    }

    fn first_selector_match<'s>(
        spec: &'s NamespaceSpec,
        query: &PolicyQuery<'_>,
    ) -> Option<&'s ResourceSpec> {
        spec.specs(query.kind).iter().find(|resource| {
            matching_entry(&resource.selector, query.labels, query.annotations).is_some()
        })
    }

    fn global_root(state: &PolicyState, field: PolicyField) -> (Option<i32>, ResolvedFrom) {
        match state
            .global
            .as_ref()
            .and_then(|global| global.fields.get(field))
        {
            Some(value) => (Some(cap(value, field)), ResolvedFrom::Global),
            None => (None, ResolvedFrom::None),
        }
    }
}

/// System maxima cap any resolved value.
fn cap(value: i32, field: PolicyField) -> i32 {
    value.min(field.maximum())
}
