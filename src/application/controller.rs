//! Controller assembly.
//!
//! Owns the per-kind reactors and the sweep coordinator, and translates
//! configuration-object events into policy store updates and sweep
//! triggers. Workload events flow in through [`Controller::observe`]; a
//! periodic [`Controller::resync`] re-observes everything the store holds,
//! which is how local mode and tests drive the reactors without a watch
//! stream.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::models::{
    is_reserved_namespace, ConfigObject, WorkloadKind, CONFIG_TYPE_GLOBAL, CONFIG_TYPE_NAMESPACE,
};
use crate::domain::ports::{Clock, NamespaceSource, WorkloadStore};
use crate::services::policy_store::PolicyStore;
use crate::services::reactor::Reactor;
use crate::services::sweep::SweepCoordinator;

/// A change to a configuration object, as delivered by the watcher.
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    /// Created or updated.
    Applied(ConfigObject),
    Deleted(ConfigObject),
}

/// The assembled controller.
pub struct Controller<S, C> {
    store: Arc<S>,
    policies: Arc<PolicyStore>,
    clock: Arc<C>,
    namespaces: Arc<dyn NamespaceSource>,
    pipeline_reactor: Arc<Reactor<S, C>>,
    task_reactor: Arc<Reactor<S, C>>,
    sweep: Arc<SweepCoordinator<S, C>>,
    namespace_filter: Option<Vec<String>>,
}

impl<S, C> Controller<S, C>
where
    S: WorkloadStore + 'static,
    C: Clock + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        policies: Arc<PolicyStore>,
        clock: Arc<C>,
        namespaces: Arc<dyn NamespaceSource>,
        pipeline_reactor: Arc<Reactor<S, C>>,
        task_reactor: Arc<Reactor<S, C>>,
        sweep: Arc<SweepCoordinator<S, C>>,
        namespace_filter: Option<Vec<String>>,
    ) -> Self {
        Self {
            store,
            policies,
            clock,
            namespaces,
            pipeline_reactor,
            task_reactor,
            sweep,
            namespace_filter,
        }
    }

    /// Spawn reactor workers for both kinds.
    pub fn start(&self, concurrency: usize) -> Vec<JoinHandle<()>> {
        let mut handles = Arc::clone(&self.pipeline_reactor).spawn_workers(concurrency);
        handles.extend(Arc::clone(&self.task_reactor).spawn_workers(concurrency));
        handles
    }

    /// Close the reactor queues; workers drain and exit.
    pub fn shutdown(&self) {
        self.pipeline_reactor.shutdown();
        self.task_reactor.shutdown();
    }

    /// Feed one workload event into the matching reactor.
    pub fn observe(&self, kind: WorkloadKind, namespace: &str, name: &str) {
        match kind {
            WorkloadKind::PipelineRun => self.pipeline_reactor.observe(namespace, name),
            WorkloadKind::TaskRun => self.task_reactor.observe(namespace, name),
        }
    }

    /// React to a configuration object change. Global changes trigger a
    /// sweep; a load failure keeps the previous policy and skips the sweep.
    pub async fn apply_config_event(&self, event: ConfigEvent) {
        match event {
            ConfigEvent::Applied(obj) => match obj.config_type() {
                Some(CONFIG_TYPE_GLOBAL) => {
                    match self.policies.load_global(&obj, self.clock.now()) {
                        Ok(()) => Arc::clone(&self.sweep).trigger().await,
                        Err(err) => {
                            warn!(error = %err, "rejected global policy update; keeping previous")
                        }
                    }
                }
                Some(CONFIG_TYPE_NAMESPACE) => {
                    if let Err(err) = self.policies.load_namespace(&obj.namespace, &obj) {
                        warn!(
                            namespace = %obj.namespace,
                            error = %err,
                            "rejected namespace policy update; keeping previous"
                        );
                    }
                }
                _ => warn!(name = %obj.name, "ignoring unlabeled configuration object"),
            },
            ConfigEvent::Deleted(obj) => match obj.config_type() {
                Some(CONFIG_TYPE_GLOBAL) => {
                    self.policies.delete_global(self.clock.now());
                    Arc::clone(&self.sweep).trigger().await;
                }
                Some(CONFIG_TYPE_NAMESPACE) => self.policies.delete_namespace(&obj.namespace),
                _ => {}
            },
        }
    }

    /// A namespace vanished: drop its policy so no stale overrides linger.
    pub fn namespace_deleted(&self, namespace: &str) {
        self.policies.delete_namespace(namespace);
    }

    /// Re-observe every stored workload in every eligible namespace.
    pub async fn resync(&self) {
        let all = match self.namespaces.namespaces().await {
            Ok(all) => all,
            Err(err) => {
                warn!(error = %err, "resync could not enumerate namespaces");
                return;
            }
        };
        let mut observed = 0usize;
        for namespace in all {
            if is_reserved_namespace(&namespace) {
                continue;
            }
            if let Some(filter) = &self.namespace_filter {
                if !filter.iter().any(|f| f == &namespace) {
                    continue;
                }
            }
            for kind in WorkloadKind::ALL {
                match self.store.list(kind, &namespace).await {
                    Ok(workloads) => {
                        for workload in workloads {
                            self.observe(kind, &workload.namespace, &workload.name);
                            observed += 1;
                        }
                    }
                    Err(err) => {
                        warn!(namespace = %namespace, %kind, error = %err, "resync list failed");
                    }
                }
            }
        }
        info!(observed, "resync enqueued observations");
    }
}
