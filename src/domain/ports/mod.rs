//! Ports to external collaborators.
//!
//! The controller core consumes the workload store, the namespace
//! enumerator, and the clock exclusively through these traits; adapters
//! (in-memory for tests and local mode, cluster-backed elsewhere) implement
//! them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::errors::StoreError;
use super::models::{Workload, WorkloadKind};

/// Injectable time source. All policy math goes through this so tests can
/// drive expiry deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used in production wiring.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A single annotation mutation, applied as a targeted patch so foreign
/// annotations survive untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationPatch {
    /// JSON-merge-style set of the given annotation keys.
    Merge(BTreeMap<String, String>),
    /// JSON-patch-style removal of a single annotation key.
    Remove(String),
}

impl AnnotationPatch {
    /// Convenience constructor for a single-key merge.
    pub fn set(key: &str, value: &str) -> Self {
        let mut map = BTreeMap::new();
        map.insert(key.to_string(), value.to_string());
        Self::Merge(map)
    }
}

/// Uniform capability set over the two workload kinds.
///
/// Every call awaits the external store and is cancellable by dropping the
/// enclosing task; implementations must not block.
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    /// All workloads of `kind` in `namespace`.
    async fn list(&self, kind: WorkloadKind, namespace: &str)
        -> Result<Vec<Workload>, StoreError>;

    /// Workloads whose labels contain every given `(key, value)` pair.
    async fn list_by_labels(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Workload>, StoreError>;

    /// Workloads whose annotations contain every given `(key, value)` pair.
    async fn list_by_annotations(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Vec<Workload>, StoreError>;

    async fn get(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Workload, StoreError>;

    /// Delete a workload. With `only_if_completed` the store must refuse
    /// with [`StoreError::Conflict`] when the workload is no longer in a
    /// completed state — the deletion-safety precondition.
    async fn delete(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        only_if_completed: bool,
    ) -> Result<(), StoreError>;

    /// Apply an annotation patch without touching any other field.
    async fn patch_annotations(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        patch: AnnotationPatch,
    ) -> Result<(), StoreError>;

    /// Replace a stored workload wholesale. The core itself never calls
    /// this; it exists for adapters and test fixtures.
    async fn update(&self, workload: Workload) -> Result<(), StoreError>;
}

/// Enumerates namespaces eligible for sweeping.
#[async_trait]
pub trait NamespaceSource: Send + Sync {
    async fn namespaces(&self) -> Result<Vec<String>, StoreError>;
}
