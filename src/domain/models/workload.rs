//! Workload domain model.
//!
//! A workload is a completed or in-flight execution artifact — a
//! `PipelineRun` or a standalone `TaskRun` — whose lifecycle is owned by the
//! external workload store. The controller only observes workloads, stamps
//! two annotations on them, and deletes them once retention policy says so.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Annotation carrying the TTL (in seconds) stamped on first observation of
/// a workload that resolved a TTL policy. Authoritative once written.
pub const TTL_ANNOTATION: &str = "custodian.io/ttl-seconds-after-finished";

/// Annotation recording when the history limiter last evaluated the
/// workload's bucket. RFC 3339 UTC, so string comparison is time ordered.
pub const PROCESSED_ANNOTATION: &str = "custodian.io/history-limit-check-processed";

/// Sentinel TTL annotation value opting a workload out of TTL deletion when
/// resource-level enforcement is in effect.
pub const TTL_OPT_OUT: i64 = -1;

/// Label naming the pipeline a `PipelineRun` executes.
pub const PIPELINE_NAME_LABEL: &str = "custodian.io/pipeline";

/// Label naming the task a `TaskRun` executes.
pub const TASK_NAME_LABEL: &str = "custodian.io/task";

/// Label linking a `TaskRun` to the `PipelineRun` that spawned it.
pub const PARENT_RUN_LABEL: &str = "custodian.io/part-of-pipeline-run";

/// The two workload kinds governed by retention policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    PipelineRun,
    TaskRun,
}

impl WorkloadKind {
    pub const ALL: [Self; 2] = [Self::PipelineRun, Self::TaskRun];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PipelineRun => "PipelineRun",
            Self::TaskRun => "TaskRun",
        }
    }

    /// Label key carrying the default bucket name for this kind: the
    /// pipeline name for pipeline runs, the task name for task runs.
    pub fn name_label(self) -> &'static str {
        match self {
            Self::PipelineRun => PIPELINE_NAME_LABEL,
            Self::TaskRun => TASK_NAME_LABEL,
        }
    }
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal classification of a workload's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    /// No terminal condition yet, or the condition is indeterminate.
    Unknown,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Reference to an owning object, as reported by the workload store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
}

/// A single observed workload.
///
/// Identity is `(kind, namespace, name)` plus an immutable `uid` that
/// survives name reuse. The controller never mutates anything here except
/// the two owned annotations, and only via store patches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    #[serde(default)]
    pub owner_refs: Vec<OwnerRef>,
    /// True once the store has marked the workload for deletion.
    #[serde(default)]
    pub under_deletion: bool,
}

impl Workload {
    /// Minimal workload for wiring and tests; further fields are filled in
    /// with the builder-style `with_*` methods.
    pub fn new(kind: WorkloadKind, namespace: &str, name: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: String::new(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            created_at,
            started_at: None,
            completed_at: None,
            status: RunStatus::Unknown,
            owner_refs: Vec::new(),
            under_deletion: false,
        }
    }

    #[must_use]
    pub fn with_uid(mut self, uid: &str) -> Self {
        self.uid = uid.to_string();
        self
    }

    #[must_use]
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_owner(mut self, kind: &str, name: &str) -> Self {
        self.owner_refs.push(OwnerRef {
            kind: kind.to_string(),
            name: name.to_string(),
        });
        self
    }

    /// Mark the run finished with the given outcome.
    #[must_use]
    pub fn finished(
        mut self,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        status: RunStatus,
    ) -> Self {
        self.started_at = Some(started_at);
        self.completed_at = Some(completed_at);
        self.status = status;
        self
    }

    /// Human-readable identity used in logs and error messages.
    pub fn id(&self) -> String {
        format!("{} {}/{}", self.kind, self.namespace, self.name)
    }

    /// A workload is completed iff it started AND either carries a
    /// completion time or reached a terminal status.
    pub fn is_completed(&self) -> bool {
        self.started_at.is_some() && (self.completed_at.is_some() || self.status.is_terminal())
    }

    pub fn is_successful(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }

    /// Completion time, if determinate. Deletion math must never run on a
    /// workload without one.
    pub fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Value of the default bucket label for this workload's kind.
    pub fn default_name(&self) -> Option<&str> {
        self.labels.get(self.kind.name_label()).map(String::as_str)
    }

    /// Fresh workloads can be observed before their labels land; until a
    /// workload has labels or our TTL annotation there is nothing to act on.
    pub fn should_ignore(&self) -> bool {
        self.labels.is_empty() && !self.annotations.contains_key(TTL_ANNOTATION)
    }

    /// Parsed TTL annotation, if present and well formed.
    pub fn ttl_from_annotation(&self) -> Option<i64> {
        self.annotations
            .get(TTL_ANNOTATION)
            .and_then(|v| v.trim().parse::<i64>().ok())
    }

    /// Parsed history-limiter processed timestamp, if present and well formed.
    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.annotations
            .get(PROCESSED_ANNOTATION)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// A `TaskRun` spawned by a `PipelineRun` is retained transitively with
    /// its parent. Both detection mechanisms are honored: owner reference
    /// kind and the parent-run label.
    pub fn has_pipeline_run_parent(&self) -> bool {
        self.owner_refs
            .iter()
            .any(|o| o.kind == WorkloadKind::PipelineRun.as_str())
            || self.labels.contains_key(PARENT_RUN_LABEL)
    }
}
