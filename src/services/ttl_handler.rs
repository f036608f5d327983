//! TTL handling for completed workloads.
//!
//! On first observation of a workload that resolves a TTL policy, the
//! handler stamps the TTL as an annotation; from then on the annotation is
//! authoritative and is never rewritten mid-life. Once the workload is
//! completed and `completion time + TTL` has passed, the workload is
//! deleted. The handler never sleeps: when the deadline lies in the future
//! it returns the remaining duration and the reactor schedules the
//! re-observation.

use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use tracing::{debug, info};

use crate::domain::errors::StoreError;
use crate::domain::models::{EnforcedLevel, Workload, TTL_ANNOTATION, TTL_OPT_OUT};
use crate::domain::ports::{AnnotationPatch, Clock, WorkloadStore};
use crate::infrastructure::metrics::{Handler, Metrics};
use crate::services::policy_store::{PolicyQuery, PolicyStore};

/// Delay before retrying after a write conflict.
const CONFLICT_RETRY: Duration = Duration::seconds(10);

/// Why an observation required no action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Neither labels nor the TTL annotation have landed yet.
    AwaitingLabels,
    /// The store already marked the workload for deletion.
    UnderDeletion,
    /// No layer of the policy hierarchy defines a TTL here.
    NoPolicy,
    /// Resource-level enforcement and an opt-out annotation.
    OptedOut,
    /// The TTL annotation holds an unusable value.
    InvalidAnnotation,
    /// The workload disappeared while we were acting on it.
    Gone,
    /// Completed status without a completion time; never delete these.
    NoCompletionTime,
}

/// Result of one TTL observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtlOutcome {
    Skipped(SkipReason),
    /// The workload is still executing; the reactor will observe the
    /// completion transition.
    AwaitingCompletion,
    /// Not yet expired (or a retriable write conflict); re-observe after
    /// this delay.
    RequeueAfter(Duration),
    /// The workload was deleted, or was already gone.
    Deleted,
}

/// Per-workload TTL bookkeeping and deletion.
pub struct TtlHandler<S, C> {
    store: Arc<S>,
    policies: Arc<PolicyStore>,
    clock: Arc<C>,
    metrics: Arc<Metrics>,
}

impl<S: WorkloadStore, C: Clock> TtlHandler<S, C> {
    pub fn new(store: Arc<S>, policies: Arc<PolicyStore>, clock: Arc<C>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            policies,
            clock,
            metrics,
        }
    }

    /// Process one observation of `workload`.
    pub async fn observe(&self, workload: &Workload) -> Result<TtlOutcome, StoreError> {
        let started = Instant::now();
        self.metrics.observe_workload(&workload.uid);
        let result = self.observe_inner(workload).await;
        self.metrics
            .observe_duration(Handler::Ttl, started.elapsed().as_secs_f64());
        if let Err(err) = &result {
            self.metrics.record_error(err.class());
        }
        result
    }

    async fn observe_inner(&self, workload: &Workload) -> Result<TtlOutcome, StoreError> {
        if workload.should_ignore() {
            return Ok(TtlOutcome::Skipped(SkipReason::AwaitingLabels));
        }
        if workload.under_deletion {
            return Ok(TtlOutcome::Skipped(SkipReason::UnderDeletion));
        }

        let query = PolicyQuery::for_workload(workload);
        let (resolved, source) = self.policies.ttl(&query);
        let Some(resolved) = resolved else {
            return Ok(TtlOutcome::Skipped(SkipReason::NoPolicy));
        };

        let ttl = match workload.ttl_from_annotation() {
            Some(value) => value,
            None => {
                debug!(
                    workload = %workload.id(),
                    ttl = resolved,
                    source = source.as_str(),
                    "stamping ttl annotation"
                );
                match self
                    .store
                    .patch_annotations(
                        workload.kind,
                        &workload.namespace,
                        &workload.name,
                        AnnotationPatch::set(TTL_ANNOTATION, &resolved.to_string()),
                    )
                    .await
                {
                    Ok(()) => i64::from(resolved),
                    Err(err) if err.is_not_found() => {
                        return Ok(TtlOutcome::Skipped(SkipReason::Gone))
                    }
                    Err(err) if err.is_conflict() => {
                        return Ok(TtlOutcome::RequeueAfter(CONFLICT_RETRY))
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        if ttl < 0 {
            let (level, _) = self.policies.enforced_level(&query);
            if ttl == TTL_OPT_OUT && level == EnforcedLevel::Resource {
                return Ok(TtlOutcome::Skipped(SkipReason::OptedOut));
            }
            return Ok(TtlOutcome::Skipped(SkipReason::InvalidAnnotation));
        }

        if !workload.is_completed() {
            return Ok(TtlOutcome::AwaitingCompletion);
        }
        let Some(completed_at) = workload.completion_time() else {
            return Ok(TtlOutcome::Skipped(SkipReason::NoCompletionTime));
        };

        let expires_at = completed_at + Duration::seconds(ttl);
        let now = self.clock.now();
        if now < expires_at {
            return Ok(TtlOutcome::RequeueAfter(expires_at - now));
        }

        match self
            .store
            .delete(workload.kind, &workload.namespace, &workload.name, true)
            .await
        {
            Ok(()) => {
                info!(
                    workload = %workload.id(),
                    ttl,
                    expired = %expires_at,
                    "deleted expired workload"
                );
                self.metrics
                    .record_deletion(workload.kind, Handler::Ttl, "deleted");
                Ok(TtlOutcome::Deleted)
            }
            // The intended end state obtains.
            Err(err) if err.is_not_found() => Ok(TtlOutcome::Deleted),
            Err(err) if err.is_conflict() => Ok(TtlOutcome::RequeueAfter(CONFLICT_RETRY)),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryWorkloadStore, ManualClock};
    use crate::domain::models::{ConfigObject, RunStatus, WorkloadKind, PIPELINE_NAME_LABEL};
    use chrono::{DateTime, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryWorkloadStore>,
        policies: Arc<PolicyStore>,
        clock: Arc<ManualClock>,
        handler: TtlHandler<InMemoryWorkloadStore, ManualClock>,
    }

    fn fixture(global_yaml: &str) -> Fixture {
        let store = Arc::new(InMemoryWorkloadStore::new());
        let policies = Arc::new(PolicyStore::new());
        if !global_yaml.is_empty() {
            policies
                .load_global(&ConfigObject::global().with_payload(global_yaml), t0())
                .unwrap();
        }
        let clock = Arc::new(ManualClock::new(t0()));
        let handler = TtlHandler::new(
            store.clone(),
            policies.clone(),
            clock.clone(),
            Arc::new(Metrics::new()),
        );
        Fixture {
            store,
            policies,
            clock,
            handler,
        }
    }

    fn completed_pr(name: &str, completed_at: DateTime<Utc>) -> Workload {
        Workload::new(WorkloadKind::PipelineRun, "dev", name, t0())
            .with_label(PIPELINE_NAME_LABEL, "build")
            .finished(t0(), completed_at, RunStatus::Succeeded)
    }

    #[tokio::test]
    async fn expired_workload_is_deleted() {
        let fx = fixture("ttlSecondsAfterFinished: 3600");
        let pr = completed_pr("pr-1", t0()).with_annotation(TTL_ANNOTATION, "3600");
        fx.store.insert(pr.clone()).await;

        fx.clock.set(t0() + Duration::hours(1) + Duration::seconds(1));
        let outcome = fx.handler.observe(&pr).await.unwrap();
        assert_eq!(outcome, TtlOutcome::Deleted);
        assert!(fx
            .store
            .get(WorkloadKind::PipelineRun, "dev", "pr-1")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn unexpired_workload_requeues_with_remaining_time() {
        let fx = fixture("ttlSecondsAfterFinished: 3600");
        let pr = completed_pr("pr-1", t0()).with_annotation(TTL_ANNOTATION, "3600");
        fx.store.insert(pr.clone()).await;

        fx.clock.set(t0() + Duration::minutes(10));
        let outcome = fx.handler.observe(&pr).await.unwrap();
        assert_eq!(outcome, TtlOutcome::RequeueAfter(Duration::minutes(50)));
    }

    #[tokio::test]
    async fn first_observation_stamps_the_resolved_ttl() {
        let fx = fixture("ttlSecondsAfterFinished: 3600");
        let pr = completed_pr("pr-1", t0());
        fx.store.insert(pr.clone()).await;

        let outcome = fx.handler.observe(&pr).await.unwrap();
        // Stamped, then evaluated with a future deadline.
        assert_eq!(outcome, TtlOutcome::RequeueAfter(Duration::hours(1)));
        let stored = fx
            .store
            .get(WorkloadKind::PipelineRun, "dev", "pr-1")
            .await
            .unwrap();
        assert_eq!(stored.annotations[TTL_ANNOTATION], "3600");
    }

    #[tokio::test]
    async fn zero_ttl_stamps_then_deletes_immediately() {
        let fx = fixture("ttlSecondsAfterFinished: 0");
        let pr = completed_pr("pr-1", t0());
        fx.store.insert(pr.clone()).await;

        let outcome = fx.handler.observe(&pr).await.unwrap();
        assert_eq!(outcome, TtlOutcome::Deleted);
        // The annotation went on before the delete.
        let patches = fx.store.patch_log().await;
        assert!(!patches.is_empty());
    }

    #[tokio::test]
    async fn stamped_annotation_is_authoritative_over_policy_changes() {
        let fx = fixture("ttlSecondsAfterFinished: 3600");
        let pr = completed_pr("pr-1", t0()).with_annotation(TTL_ANNOTATION, "60");
        fx.store.insert(pr.clone()).await;

        // Policy says an hour; the stamp says a minute. The stamp wins.
        fx.clock.set(t0() + Duration::seconds(61));
        let outcome = fx.handler.observe(&pr).await.unwrap();
        assert_eq!(outcome, TtlOutcome::Deleted);
    }

    #[tokio::test]
    async fn no_policy_means_no_action() {
        let fx = fixture("");
        let pr = completed_pr("pr-1", t0());
        fx.store.insert(pr.clone()).await;

        let outcome = fx.handler.observe(&pr).await.unwrap();
        assert_eq!(outcome, TtlOutcome::Skipped(SkipReason::NoPolicy));
        let stored = fx
            .store
            .get(WorkloadKind::PipelineRun, "dev", "pr-1")
            .await
            .unwrap();
        assert!(!stored.annotations.contains_key(TTL_ANNOTATION));
    }

    #[tokio::test]
    async fn unlabeled_fresh_workload_is_ignored() {
        let fx = fixture("ttlSecondsAfterFinished: 0");
        let bare = Workload::new(WorkloadKind::PipelineRun, "dev", "pr-1", t0())
            .finished(t0(), t0(), RunStatus::Succeeded);
        fx.store.insert(bare.clone()).await;

        let outcome = fx.handler.observe(&bare).await.unwrap();
        assert_eq!(outcome, TtlOutcome::Skipped(SkipReason::AwaitingLabels));
    }

    #[tokio::test]
    async fn incomplete_workload_awaits_completion() {
        let fx = fixture("ttlSecondsAfterFinished: 60");
        let mut pr = Workload::new(WorkloadKind::PipelineRun, "dev", "pr-1", t0())
            .with_label(PIPELINE_NAME_LABEL, "build");
        pr.started_at = Some(t0());
        fx.store.insert(pr.clone()).await;

        let outcome = fx.handler.observe(&pr).await.unwrap();
        assert_eq!(outcome, TtlOutcome::AwaitingCompletion);
        assert!(fx
            .store
            .get(WorkloadKind::PipelineRun, "dev", "pr-1")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn opt_out_honored_under_resource_enforcement() {
        let fx = fixture("enforcedConfigLevel: resource\nttlSecondsAfterFinished: 0");
        let pr = completed_pr("pr-1", t0()).with_annotation(TTL_ANNOTATION, "-1");
        fx.store.insert(pr.clone()).await;

        let outcome = fx.handler.observe(&pr).await.unwrap();
        assert_eq!(outcome, TtlOutcome::Skipped(SkipReason::OptedOut));
    }

    #[tokio::test]
    async fn negative_annotation_without_resource_level_is_inert() {
        let fx = fixture("ttlSecondsAfterFinished: 0");
        let pr = completed_pr("pr-1", t0()).with_annotation(TTL_ANNOTATION, "-1");
        fx.store.insert(pr.clone()).await;

        let outcome = fx.handler.observe(&pr).await.unwrap();
        assert_eq!(outcome, TtlOutcome::Skipped(SkipReason::InvalidAnnotation));
        assert!(fx
            .store
            .get(WorkloadKind::PipelineRun, "dev", "pr-1")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn under_deletion_workloads_are_left_alone() {
        let fx = fixture("ttlSecondsAfterFinished: 0");
        let mut pr = completed_pr("pr-1", t0());
        pr.under_deletion = true;
        fx.store.insert(pr.clone()).await;

        let outcome = fx.handler.observe(&pr).await.unwrap();
        assert_eq!(outcome, TtlOutcome::Skipped(SkipReason::UnderDeletion));
    }

    #[tokio::test]
    async fn delete_conflict_maps_to_requeue() {
        let fx = fixture("ttlSecondsAfterFinished: 0");
        let pr = completed_pr("pr-1", t0()).with_annotation(TTL_ANNOTATION, "0");
        fx.store.insert(pr.clone()).await;
        fx.store
            .fail_next_delete(
                WorkloadKind::PipelineRun,
                "dev",
                "pr-1",
                StoreError::Conflict("pr-1".into(), "phase changed".into()),
            )
            .await;

        let outcome = fx.handler.observe(&pr).await.unwrap();
        assert_eq!(outcome, TtlOutcome::RequeueAfter(CONFLICT_RETRY));
        // Still present; a later observation finishes the job.
        assert!(fx
            .store
            .get(WorkloadKind::PipelineRun, "dev", "pr-1")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn observing_twice_is_idempotent() {
        let fx = fixture("ttlSecondsAfterFinished: 3600");
        let pr = completed_pr("pr-1", t0());
        fx.store.insert(pr.clone()).await;

        fx.handler.observe(&pr).await.unwrap();
        let refreshed = fx
            .store
            .get(WorkloadKind::PipelineRun, "dev", "pr-1")
            .await
            .unwrap();
        let patches_after_first = fx.store.patch_log().await.len();

        let outcome = fx.handler.observe(&refreshed).await.unwrap();
        assert_eq!(outcome, TtlOutcome::RequeueAfter(Duration::hours(1)));
        // No second write: the annotation already carries the TTL.
        assert_eq!(fx.store.patch_log().await.len(), patches_after_first);
    }

    #[tokio::test]
    async fn policy_removal_deactivates_even_stamped_workloads() {
        let fx = fixture("ttlSecondsAfterFinished: 60");
        let pr = completed_pr("pr-1", t0()).with_annotation(TTL_ANNOTATION, "60");
        fx.store.insert(pr.clone()).await;

        fx.policies.delete_global(t0());
        fx.clock.set(t0() + Duration::hours(2));
        let outcome = fx.handler.observe(&pr).await.unwrap();
        assert_eq!(outcome, TtlOutcome::Skipped(SkipReason::NoPolicy));
    }
}
