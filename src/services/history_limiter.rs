//! History limiting for completed workloads.
//!
//! Each event scopes a bucket — the workloads a single limit evaluation
//! governs — partitions it into successful and failed sides, and prunes
//! each side oldest-first until it fits the resolved cap. A successful
//! evaluation stamps the workload with a processed annotation so repeat
//! events short-circuit until the policy revision advances past the stamp.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::domain::errors::StoreError;
use crate::domain::models::{Workload, PROCESSED_ANNOTATION};
use crate::domain::ports::{AnnotationPatch, Clock, WorkloadStore};
use crate::infrastructure::metrics::{Handler, Metrics};
use crate::services::policy_store::{PolicyQuery, PolicyStore};
use crate::services::selector::entry_matches;

/// Why an event required no evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistorySkip {
    /// Neither labels nor the TTL annotation have landed yet.
    AwaitingLabels,
    /// The store already marked the workload for deletion.
    UnderDeletion,
    /// Only completed workloads count against history.
    NotCompleted,
    /// Already evaluated at or after the current policy revision.
    AlreadyProcessed,
    /// No layer of the policy hierarchy defines history limits here.
    NoPolicy,
}

/// Result of one history evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    Skipped(HistorySkip),
    /// The bucket was evaluated; `deleted` workloads were pruned.
    Evaluated { deleted: usize },
}

/// Per-event bucket pruning.
pub struct HistoryLimiter<S, C> {
    store: Arc<S>,
    policies: Arc<PolicyStore>,
    clock: Arc<C>,
    metrics: Arc<Metrics>,
}

impl<S: WorkloadStore, C: Clock> HistoryLimiter<S, C> {
    pub fn new(store: Arc<S>, policies: Arc<PolicyStore>, clock: Arc<C>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            policies,
            clock,
            metrics,
        }
    }

    /// Evaluate the bucket the workload belongs to.
    pub async fn evaluate(&self, workload: &Workload) -> Result<HistoryOutcome, StoreError> {
        let started = Instant::now();
        self.metrics.observe_workload(&workload.uid);
        let result = self.evaluate_inner(workload).await;
        self.metrics
            .observe_duration(Handler::History, started.elapsed().as_secs_f64());
        if let Err(err) = &result {
            self.metrics.record_error(err.class());
        }
        result
    }

    async fn evaluate_inner(&self, workload: &Workload) -> Result<HistoryOutcome, StoreError> {
        if workload.under_deletion {
            return Ok(HistoryOutcome::Skipped(HistorySkip::UnderDeletion));
        }
        if !workload.is_completed() {
            return Ok(HistoryOutcome::Skipped(HistorySkip::NotCompleted));
        }
        if workload.should_ignore() {
            return Ok(HistoryOutcome::Skipped(HistorySkip::AwaitingLabels));
        }
        if self.already_processed(workload) {
            return Ok(HistoryOutcome::Skipped(HistorySkip::AlreadyProcessed));
        }

        let query = PolicyQuery::for_workload(workload);
        let (success_limit, _) = self.policies.success_limit(&query);
        let (failure_limit, _) = self.policies.failure_limit(&query);
        if success_limit.is_none() && failure_limit.is_none() {
            return Ok(HistoryOutcome::Skipped(HistorySkip::NoPolicy));
        }

        let bucket = self.list_bucket(workload, &query).await?;
        let (successes, failures): (Vec<_>, Vec<_>) = bucket
            .into_iter()
            .filter(Workload::is_completed)
            .partition(Workload::is_successful);
        let failures: Vec<_> = failures.into_iter().filter(Workload::is_failed).collect();

        let mut deleted = 0;
        let mut first_error = None;
        for (side, limit) in [(successes, success_limit), (failures, failure_limit)] {
            let Some(limit) = limit else { continue };
            match self.prune_side(side, limit as usize).await {
                Ok(count) => deleted += count,
                Err(err) => {
                    // The other side still gets its evaluation.
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let stamp = self.clock.now().to_rfc3339();
        match self
            .store
            .patch_annotations(
                workload.kind,
                &workload.namespace,
                &workload.name,
                AnnotationPatch::set(PROCESSED_ANNOTATION, &stamp),
            )
            .await
        {
            // The workload may have been pruned as part of its own bucket.
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        Ok(HistoryOutcome::Evaluated { deleted })
    }

    /// The processed annotation short-circuits repeat evaluations until the
    /// policy revision advances past it.
    fn already_processed(&self, workload: &Workload) -> bool {
        match workload.processed_at() {
            Some(processed) => match self.policies.revision() {
                Some(revision) => processed >= revision,
                None => true,
            },
            None => false,
        }
    }

    /// Bucket scoping: matched selector, else default name label, else the
    /// whole namespace (per kind).
    async fn list_bucket(
        &self,
        workload: &Workload,
        query: &PolicyQuery<'_>,
    ) -> Result<Vec<Workload>, StoreError> {
        if let Some(selector) = self.policies.matching_selector(query) {
            let candidates = self
                .store
                .list_by_labels(workload.kind, &workload.namespace, &selector.match_labels)
                .await?;
            return Ok(candidates
                .into_iter()
                .filter(|w| entry_matches(&selector, &w.labels, &w.annotations))
                .collect());
        }

        if let Some(name) = workload.default_name() {
            let mut labels = BTreeMap::new();
            labels.insert(workload.kind.name_label().to_string(), name.to_string());
            return self
                .store
                .list_by_labels(workload.kind, &workload.namespace, &labels)
                .await;
        }

        self.store.list(workload.kind, &workload.namespace).await
    }

    /// Delete oldest-first until the side fits the limit. Retention keeps
    /// the newest N by creation time; creation-time ties break by name.
    async fn prune_side(&self, mut side: Vec<Workload>, limit: usize) -> Result<usize, StoreError> {
        side.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut deleted = 0;
        let mut oldest_first = side.into_iter();
        let mut remaining = oldest_first.len();
        while remaining > limit {
            let Some(victim) = oldest_first.next() else { break };
            remaining -= 1;
            debug!(workload = %victim.id(), "pruning over-quota workload");
            match self
                .store
                .delete(victim.kind, &victim.namespace, &victim.name, true)
                .await
            {
                Ok(()) => {
                    info!(workload = %victim.id(), "deleted over-quota workload");
                    self.metrics
                        .record_deletion(victim.kind, Handler::History, "deleted");
                    deleted += 1;
                }
                // Raced with another worker; the end state obtains.
                Err(err) if err.is_not_found() => deleted += 1,
                Err(err) => return Err(err),
            }
        }
        Ok(deleted)
    }
}
