//! Per-kind event reactors.
//!
//! One reactor runs per workload kind. Observations land on a keyed
//! coalescing queue; a bounded set of workers drains it, running the
//! history limiter and then the TTL handler for each observed workload.
//! TTL requeues become deferred re-observations via spawned timers, so
//! handlers stay synchronous and pure from a scheduling standpoint.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::domain::models::{Workload, WorkloadKind};
use crate::domain::ports::{Clock, WorkloadStore};
use crate::infrastructure::metrics::Metrics;
use crate::services::history_limiter::HistoryLimiter;
use crate::services::ttl_handler::{TtlHandler, TtlOutcome};
use crate::services::workqueue::KeyedQueue;

/// Delay before retrying an observation that failed with a transient error.
const ERROR_RETRY: chrono::Duration = chrono::Duration::seconds(30);

/// Observation key: one workload of the reactor's kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadKey {
    pub namespace: String,
    pub name: String,
}

impl WorkloadKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Controller loop for one workload kind.
pub struct Reactor<S, C> {
    kind: WorkloadKind,
    store: Arc<S>,
    history: Arc<HistoryLimiter<S, C>>,
    ttl: Arc<TtlHandler<S, C>>,
    queue: Arc<KeyedQueue<WorkloadKey>>,
    metrics: Arc<Metrics>,
}

impl<S, C> Reactor<S, C>
where
    S: WorkloadStore + 'static,
    C: Clock + 'static,
{
    pub fn new(
        kind: WorkloadKind,
        store: Arc<S>,
        history: Arc<HistoryLimiter<S, C>>,
        ttl: Arc<TtlHandler<S, C>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            kind,
            store,
            history,
            ttl,
            queue: Arc::new(KeyedQueue::new()),
            metrics,
        }
    }

    pub fn kind(&self) -> WorkloadKind {
        self.kind
    }

    /// Feed an observation into the reactor.
    pub fn observe(&self, namespace: &str, name: &str) {
        self.queue.add(WorkloadKey::new(namespace, name));
    }

    /// Start `concurrency` workers draining the queue.
    pub fn spawn_workers(self: Arc<Self>, concurrency: usize) -> Vec<JoinHandle<()>> {
        (0..concurrency.max(1))
            .map(|_| {
                let reactor = Arc::clone(&self);
                tokio::spawn(async move { reactor.worker_loop().await })
            })
            .collect()
    }

    /// Close the queue; workers drain what is left and exit.
    pub fn shutdown(&self) {
        self.queue.close();
    }

    async fn worker_loop(self: Arc<Self>) {
        while let Some(key) = self.queue.next().await {
            self.process(&key).await;
            self.queue.done(&key);
        }
    }

    async fn process(&self, key: &WorkloadKey) {
        let workload = match self.store.get(self.kind, &key.namespace, &key.name).await {
            Ok(workload) => workload,
            Err(err) if err.is_not_found() => return,
            Err(err) => {
                warn!(
                    kind = %self.kind,
                    namespace = %key.namespace,
                    name = %key.name,
                    error = %err,
                    "failed to fetch observed workload"
                );
                self.metrics.record_error(err.class());
                self.requeue_after(key.clone(), ERROR_RETRY);
                return;
            }
        };

        if self.skip_parented(&workload) {
            return;
        }

        match self.history.evaluate(&workload).await {
            Ok(outcome) => debug!(workload = %workload.id(), ?outcome, "history evaluated"),
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                // Reconcile failure: retry the whole observation later.
                error!(workload = %workload.id(), error = %err, "history evaluation failed");
                self.requeue_after(key.clone(), ERROR_RETRY);
                return;
            }
        }

        match self.ttl.observe(&workload).await {
            Ok(TtlOutcome::RequeueAfter(delay)) => self.requeue_after(key.clone(), delay),
            Ok(outcome) => debug!(workload = %workload.id(), ?outcome, "ttl observed"),
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                error!(workload = %workload.id(), error = %err, "ttl handling failed");
                self.requeue_after(key.clone(), ERROR_RETRY);
            }
        }
    }

    /// TaskRuns owned by a PipelineRun are retained transitively with their
    /// parent; the PipelineRun reactor and the store's cascading semantics
    /// cover them.
    fn skip_parented(&self, workload: &Workload) -> bool {
        self.kind == WorkloadKind::TaskRun && workload.has_pipeline_run_parent()
    }

    fn requeue_after(&self, key: WorkloadKey, delay: chrono::Duration) {
        let queue = Arc::clone(&self.queue);
        let delay = delay.to_std().unwrap_or_default();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }
}
