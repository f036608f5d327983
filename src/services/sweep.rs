//! Configuration-change–triggered cluster sweep.
//!
//! A sweep re-evaluates retention for every completed workload in every
//! eligible namespace: it first strips processed annotations that predate
//! the current policy revision, then runs the history limiter and the TTL
//! handler. Namespaces fan out across a bounded worker pool fed by a queue
//! that closes after the last name. Only one sweep runs at a time; triggers
//! arriving mid-sweep coalesce into a single follow-up run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::domain::errors::StoreError;
use crate::domain::models::{is_reserved_namespace, Workload, WorkloadKind, PROCESSED_ANNOTATION};
use crate::domain::ports::{AnnotationPatch, Clock, NamespaceSource, WorkloadStore};
use crate::infrastructure::metrics::{Handler, Metrics};
use crate::services::history_limiter::HistoryLimiter;
use crate::services::policy_store::PolicyStore;
use crate::services::ttl_handler::TtlHandler;

/// Totals from one completed sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub namespaces: usize,
    pub invalidated: usize,
    pub errors: usize,
}

/// Fans retention evaluation out across namespaces after a policy change.
pub struct SweepCoordinator<S, C> {
    store: Arc<S>,
    namespaces: Arc<dyn NamespaceSource>,
    policies: Arc<PolicyStore>,
    history: Arc<HistoryLimiter<S, C>>,
    ttl: Arc<TtlHandler<S, C>>,
    clock: Arc<C>,
    metrics: Arc<Metrics>,
    workers: usize,
    namespace_filter: Option<Vec<String>>,
    running: Mutex<()>,
    pending: AtomicBool,
}

impl<S, C> SweepCoordinator<S, C>
where
    S: WorkloadStore + 'static,
    C: Clock + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        namespaces: Arc<dyn NamespaceSource>,
        policies: Arc<PolicyStore>,
        history: Arc<HistoryLimiter<S, C>>,
        ttl: Arc<TtlHandler<S, C>>,
        clock: Arc<C>,
        metrics: Arc<Metrics>,
        workers: usize,
        namespace_filter: Option<Vec<String>>,
    ) -> Self {
        Self {
            store,
            namespaces,
            policies,
            history,
            ttl,
            clock,
            metrics,
            workers: workers.max(1),
            namespace_filter,
            running: Mutex::new(()),
            pending: AtomicBool::new(false),
        }
    }

    /// React to a policy change. If a sweep is already running, remember to
    /// run once more after it completes; otherwise run now, absorbing any
    /// triggers that arrive mid-run.
    pub async fn trigger(self: Arc<Self>) {
        self.pending.store(true, Ordering::SeqCst);
        loop {
            let Ok(_guard) = self.running.try_lock() else {
                // The running sweep observes `pending` when it finishes.
                return;
            };
            while self.pending.swap(false, Ordering::SeqCst) {
                Arc::clone(&self).run_once().await;
            }
            drop(_guard);
            // A trigger may have slipped in between the final check and the
            // guard release; loop to pick it up.
            if !self.pending.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    /// One full sweep across all eligible namespaces.
    pub async fn run_once(self: Arc<Self>) -> SweepSummary {
        let started = Instant::now();
        let revision = self
            .policies
            .revision()
            .unwrap_or_else(|| self.clock.now());

        let all = match self.namespaces.namespaces().await {
            Ok(all) => all,
            Err(err) => {
                warn!(error = %err, "sweep could not enumerate namespaces");
                self.metrics.record_error(err.class());
                return SweepSummary {
                    errors: 1,
                    ..SweepSummary::default()
                };
            }
        };
        let eligible: Vec<String> = all
            .into_iter()
            .filter(|ns| !is_reserved_namespace(ns))
            .filter(|ns| match &self.namespace_filter {
                Some(filter) => filter.iter().any(|f| f == ns),
                None => true,
            })
            .collect();

        info!(
            namespaces = eligible.len(),
            revision = %revision,
            workers = self.workers,
            "sweep started"
        );

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        for namespace in &eligible {
            // Unbounded send only errors when all receivers are gone.
            let _ = tx.send(namespace.clone());
        }
        drop(tx);

        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let coordinator = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            handles.push(tokio::spawn(async move {
                let mut summary = SweepSummary::default();
                loop {
                    let namespace = { rx.lock().await.recv().await };
                    let Some(namespace) = namespace else { break };
                    coordinator
                        .sweep_namespace(&namespace, revision, &mut summary)
                        .await;
                    summary.namespaces += 1;
                }
                summary
            }));
        }

        let mut total = SweepSummary::default();
        for result in futures::future::join_all(handles).await {
            if let Ok(summary) = result {
                total.namespaces += summary.namespaces;
                total.invalidated += summary.invalidated;
                total.errors += summary.errors;
            }
        }

        self.metrics.record_sweep();
        self.metrics
            .observe_duration(Handler::Sweep, started.elapsed().as_secs_f64());
        info!(
            namespaces = total.namespaces,
            invalidated = total.invalidated,
            errors = total.errors,
            "sweep finished"
        );
        total
    }

    async fn sweep_namespace(
        &self,
        namespace: &str,
        revision: chrono::DateTime<chrono::Utc>,
        summary: &mut SweepSummary,
    ) {
        for kind in WorkloadKind::ALL {
            let workloads = match self.store.list(kind, namespace).await {
                Ok(workloads) => workloads,
                Err(err) => {
                    warn!(namespace, %kind, error = %err, "sweep list failed");
                    self.metrics.record_error(err.class());
                    summary.errors += 1;
                    continue;
                }
            };

            for mut workload in workloads {
                if !workload.is_completed() {
                    continue;
                }
                if let Err(err) = self
                    .invalidate_stale_stamp(&mut workload, revision, summary)
                    .await
                {
                    warn!(workload = %workload.id(), error = %err, "stamp invalidation failed");
                    self.metrics.record_error(err.class());
                    summary.errors += 1;
                    continue;
                }

                match self.history.evaluate(&workload).await {
                    Ok(_) => {}
                    // Raced with another worker; move on.
                    Err(err) if err.is_not_found() => continue,
                    Err(err) => {
                        warn!(workload = %workload.id(), error = %err, "sweep history failed");
                        summary.errors += 1;
                    }
                }

                match self.ttl.observe(&workload).await {
                    // Requeue-kind results are discarded: the event reactor
                    // will observe the workload again on its own.
                    Ok(_) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => {
                        warn!(workload = %workload.id(), error = %err, "sweep ttl failed");
                        summary.errors += 1;
                    }
                }
            }
        }
    }

    /// Remove a processed stamp older than the policy revision so the
    /// limiter re-evaluates under the new policy.
    async fn invalidate_stale_stamp(
        &self,
        workload: &mut Workload,
        revision: chrono::DateTime<chrono::Utc>,
        summary: &mut SweepSummary,
    ) -> Result<(), StoreError> {
        let Some(processed) = workload.processed_at() else {
            return Ok(());
        };
        if processed >= revision {
            return Ok(());
        }
        debug!(workload = %workload.id(), stamp = %processed, "invalidating stale processed stamp");
        match self
            .store
            .patch_annotations(
                workload.kind,
                &workload.namespace,
                &workload.name,
                AnnotationPatch::Remove(PROCESSED_ANNOTATION.to_string()),
            )
            .await
        {
            Ok(()) => {
                workload.annotations.remove(PROCESSED_ANNOTATION);
                summary.invalidated += 1;
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }
}
