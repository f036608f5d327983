//! In-memory workload store.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::StoreError;
use crate::domain::models::{Workload, WorkloadKind};
use crate::domain::ports::{AnnotationPatch, WorkloadStore};

type Key = (WorkloadKind, String, String);

fn key_of(kind: WorkloadKind, namespace: &str, name: &str) -> Key {
    (kind, namespace.to_string(), name.to_string())
}

fn display(kind: WorkloadKind, namespace: &str, name: &str) -> String {
    format!("{kind} {namespace}/{name}")
}

/// A recorded annotation patch, kept for assertions on write behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
    pub patch: AnnotationPatch,
}

#[derive(Debug, Default)]
struct StoreState {
    workloads: HashMap<Key, Workload>,
    patch_log: Vec<PatchRecord>,
    delete_failures: HashMap<Key, VecDeque<StoreError>>,
}

/// [`WorkloadStore`] over a locked map, with failure injection for
/// conflict- and outage-path tests.
#[derive(Debug, Default)]
pub struct InMemoryWorkloadStore {
    state: RwLock<StoreState>,
}

impl InMemoryWorkloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a workload, minting a UID when none is set.
    pub async fn insert(&self, mut workload: Workload) {
        if workload.uid.is_empty() {
            workload.uid = Uuid::new_v4().to_string();
        }
        let key = key_of(workload.kind, &workload.namespace, &workload.name);
        self.state.write().await.workloads.insert(key, workload);
    }

    /// Queue an error for the next delete of the given workload.
    pub async fn fail_next_delete(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        error: StoreError,
    ) {
        self.state
            .write()
            .await
            .delete_failures
            .entry(key_of(kind, namespace, name))
            .or_default()
            .push_back(error);
    }

    /// Every annotation patch applied so far, oldest first.
    pub async fn patch_log(&self) -> Vec<PatchRecord> {
        self.state.read().await.patch_log.clone()
    }

    /// Total number of stored workloads across kinds and namespaces.
    pub async fn len(&self) -> usize {
        self.state.read().await.workloads.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.workloads.is_empty()
    }
}

#[async_trait]
impl WorkloadStore for InMemoryWorkloadStore {
    async fn list(
        &self,
        kind: WorkloadKind,
        namespace: &str,
    ) -> Result<Vec<Workload>, StoreError> {
        let state = self.state.read().await;
        let mut out: Vec<Workload> = state
            .workloads
            .values()
            .filter(|w| w.kind == kind && w.namespace == namespace)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn list_by_labels(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Workload>, StoreError> {
        let all = self.list(kind, namespace).await?;
        Ok(all
            .into_iter()
            .filter(|w| labels.iter().all(|(k, v)| w.labels.get(k) == Some(v)))
            .collect())
    }

    async fn list_by_annotations(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Vec<Workload>, StoreError> {
        let all = self.list(kind, namespace).await?;
        Ok(all
            .into_iter()
            .filter(|w| {
                annotations
                    .iter()
                    .all(|(k, v)| w.annotations.get(k) == Some(v))
            })
            .collect())
    }

    async fn get(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Workload, StoreError> {
        self.state
            .read()
            .await
            .workloads
            .get(&key_of(kind, namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(display(kind, namespace, name)))
    }

    async fn delete(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        only_if_completed: bool,
    ) -> Result<(), StoreError> {
        let key = key_of(kind, namespace, name);
        let mut state = self.state.write().await;

        if let Some(queued) = state.delete_failures.get_mut(&key) {
            if let Some(error) = queued.pop_front() {
                return Err(error);
            }
        }

        let Some(existing) = state.workloads.get(&key) else {
            return Err(StoreError::NotFound(display(kind, namespace, name)));
        };
        if only_if_completed && !existing.is_completed() {
            return Err(StoreError::Conflict(
                display(kind, namespace, name),
                "no longer completed".to_string(),
            ));
        }
        state.workloads.remove(&key);
        Ok(())
    }

    async fn patch_annotations(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        patch: AnnotationPatch,
    ) -> Result<(), StoreError> {
        let key = key_of(kind, namespace, name);
        let mut state = self.state.write().await;
        let Some(workload) = state.workloads.get_mut(&key) else {
            return Err(StoreError::NotFound(display(kind, namespace, name)));
        };
        match &patch {
            AnnotationPatch::Merge(entries) => {
                for (k, v) in entries {
                    workload.annotations.insert(k.clone(), v.clone());
                }
            }
            AnnotationPatch::Remove(k) => {
                workload.annotations.remove(k);
            }
        }
        state.patch_log.push(PatchRecord {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            patch,
        });
        Ok(())
    }

    async fn update(&self, workload: Workload) -> Result<(), StoreError> {
        let key = key_of(workload.kind, &workload.namespace, &workload.name);
        let mut state = self.state.write().await;
        if !state.workloads.contains_key(&key) {
            return Err(StoreError::NotFound(display(
                workload.kind,
                &workload.namespace,
                &workload.name,
            )));
        }
        state.workloads.insert(key, workload);
        Ok(())
    }
}
