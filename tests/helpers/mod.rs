//! Shared fixture assembling the full controller stack over the in-memory
//! adapters.

// Each integration binary compiles this module; not all of them use every
// helper.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use custodian::adapters::memory::{InMemoryNamespaceSource, InMemoryWorkloadStore, ManualClock};
use custodian::application::Controller;
use custodian::domain::models::{
    RunStatus, Workload, WorkloadKind, PIPELINE_NAME_LABEL, TASK_NAME_LABEL,
};
use custodian::domain::ports::WorkloadStore;
use custodian::infrastructure::metrics::Metrics;
use custodian::services::history_limiter::HistoryLimiter;
use custodian::services::policy_store::PolicyStore;
use custodian::services::reactor::Reactor;
use custodian::services::sweep::SweepCoordinator;
use custodian::services::ttl_handler::TtlHandler;
use custodian::services::validator::PolicyValidator;

pub struct Fixture {
    pub store: Arc<InMemoryWorkloadStore>,
    pub namespaces: Arc<InMemoryNamespaceSource>,
    pub policies: Arc<PolicyStore>,
    pub clock: Arc<ManualClock>,
    pub validator: PolicyValidator,
    pub sweep: Arc<SweepCoordinator<InMemoryWorkloadStore, ManualClock>>,
    pub controller: Arc<Controller<InMemoryWorkloadStore, ManualClock>>,
}

pub fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

pub fn fixture() -> Fixture {
    let store = Arc::new(InMemoryWorkloadStore::new());
    let namespaces = Arc::new(InMemoryNamespaceSource::new());
    let policies = Arc::new(PolicyStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let metrics = Arc::new(Metrics::new());
    let validator = PolicyValidator::new(policies.clone());

    let history = Arc::new(HistoryLimiter::new(
        store.clone(),
        policies.clone(),
        clock.clone(),
        metrics.clone(),
    ));
    let ttl = Arc::new(TtlHandler::new(
        store.clone(),
        policies.clone(),
        clock.clone(),
        metrics.clone(),
    ));
    let pipeline_reactor = Arc::new(Reactor::new(
        WorkloadKind::PipelineRun,
        store.clone(),
        history.clone(),
        ttl.clone(),
        metrics.clone(),
    ));
    let task_reactor = Arc::new(Reactor::new(
        WorkloadKind::TaskRun,
        store.clone(),
        history.clone(),
        ttl.clone(),
        metrics.clone(),
    ));
    let sweep = Arc::new(SweepCoordinator::new(
        store.clone(),
        namespaces.clone(),
        policies.clone(),
        history,
        ttl,
        clock.clone(),
        metrics,
        3,
        None,
    ));
    let controller = Arc::new(Controller::new(
        store.clone(),
        policies.clone(),
        clock.clone(),
        namespaces.clone(),
        pipeline_reactor,
        task_reactor,
        sweep.clone(),
        None,
    ));

    Fixture {
        store,
        namespaces,
        policies,
        clock,
        validator,
        sweep,
        controller,
    }
}

pub fn pipeline_run(
    namespace: &str,
    name: &str,
    pipeline: &str,
    created: DateTime<Utc>,
    status: RunStatus,
) -> Workload {
    Workload::new(WorkloadKind::PipelineRun, namespace, name, created)
        .with_uid(name)
        .with_label(PIPELINE_NAME_LABEL, pipeline)
        .finished(created, created + Duration::minutes(1), status)
}

pub fn task_run(
    namespace: &str,
    name: &str,
    task: &str,
    created: DateTime<Utc>,
    status: RunStatus,
) -> Workload {
    Workload::new(WorkloadKind::TaskRun, namespace, name, created)
        .with_uid(name)
        .with_label(TASK_NAME_LABEL, task)
        .finished(created, created + Duration::minutes(1), status)
}

pub async fn names(store: &InMemoryWorkloadStore, kind: WorkloadKind, ns: &str) -> Vec<String> {
    store
        .list(kind, ns)
        .await
        .unwrap()
        .into_iter()
        .map(|w| w.name)
        .collect()
}
