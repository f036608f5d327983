//! Custodian CLI entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use custodian::adapters::http::{self, AdmissionState};
use custodian::adapters::memory::{InMemoryNamespaceSource, InMemoryWorkloadStore};
use custodian::application::{ConfigEvent, Controller};
use custodian::domain::models::{ConfigObject, WorkloadKind};
use custodian::domain::ports::SystemClock;
use custodian::infrastructure::config::ConfigLoader;
use custodian::infrastructure::logging::init_logging;
use custodian::infrastructure::metrics::Metrics;
use custodian::services::history_limiter::HistoryLimiter;
use custodian::services::policy_store::PolicyStore;
use custodian::services::reactor::Reactor;
use custodian::services::sweep::SweepCoordinator;
use custodian::services::ttl_handler::TtlHandler;
use custodian::services::validator::PolicyValidator;

/// Policy-driven retention controller for completed pipeline workloads.
#[derive(Debug, Parser)]
#[command(name = "custodian", version, about)]
struct Cli {
    /// Path to a configuration file (defaults to custodian.yaml if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated namespaces to watch; empty watches all.
    #[arg(long, env = "CUSTODIAN_NAMESPACES")]
    namespaces: Option<String>,

    /// Sweep worker pool size.
    #[arg(long)]
    sweep_workers: Option<usize>,

    /// Concurrent workers per reactor.
    #[arg(long)]
    reactor_concurrency: Option<usize>,

    /// Admission endpoint port.
    #[arg(long)]
    admission_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// YAML file holding an initial global policy payload.
    #[arg(long)]
    global_policy: Option<PathBuf>,

    /// Initial namespace policy payloads, as `namespace:path` pairs.
    #[arg(long = "namespace-policy")]
    namespace_policies: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration, then let flags override it.
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    if let Some(namespaces) = &cli.namespaces {
        config.controller.namespaces = namespaces.clone();
    }
    if let Some(workers) = cli.sweep_workers {
        config.sweep.workers = workers;
    }
    if let Some(concurrency) = cli.reactor_concurrency {
        config.controller.reactor_concurrency = concurrency;
    }
    if let Some(port) = cli.admission_port {
        config.admission.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    ConfigLoader::validate(&config)?;

    init_logging(&config.logging)?;
    info!(
        sweep_workers = config.sweep.workers,
        reactor_concurrency = config.controller.reactor_concurrency,
        namespaces = %config.controller.namespaces,
        "custodian starting"
    );

    // Wiring. The in-memory adapters back local mode; cluster adapters
    // implement the same ports.
    let store = Arc::new(InMemoryWorkloadStore::new());
    let namespaces = Arc::new(InMemoryNamespaceSource::new());
    let policies = Arc::new(PolicyStore::new());
    let clock = Arc::new(SystemClock);
    let metrics = Arc::new(Metrics::new());
    let validator = Arc::new(PolicyValidator::new(policies.clone()));

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
    let namespace_filter = config.controller.namespace_filter();
    let sweep = Arc::new(SweepCoordinator::new(
        store.clone(),
        namespaces.clone(),
        policies.clone(),
        history,
        ttl,
        clock.clone(),
        metrics.clone(),
        config.sweep.workers,
        namespace_filter.clone(),
    ));
    let controller = Arc::new(Controller::new(
        store,
        policies,
        clock,
        namespaces,
        pipeline_reactor,
        task_reactor,
        sweep,
        namespace_filter,
    ));

    // Seed policies handed over on the command line.
    if let Some(path) = &cli.global_policy {
        let payload = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        controller
            .apply_config_event(ConfigEvent::Applied(
                ConfigObject::global().with_payload(&payload),
            ))
            .await;
    }
    for entry in &cli.namespace_policies {
        let Some((namespace, path)) = entry.split_once(':') else {
            warn!(entry = %entry, "ignoring malformed --namespace-policy (want namespace:path)");
            continue;
        };
        let payload = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {path}"))?;
        controller
            .apply_config_event(ConfigEvent::Applied(
                ConfigObject::namespaced(namespace).with_payload(&payload),
            ))
            .await;
    }

    let workers = controller.start(config.controller.reactor_concurrency);

    // Periodic resync keeps the reactors fed in the absence of a watch
    // stream.
    let resync = {
        let controller = controller.clone();
        let every = std::time::Duration::from_secs(config.controller.resync_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                controller.resync().await;
            }
        })
    };

    let admission = {
        let state = AdmissionState {
            validator,
            metrics,
        };
        let admission_config = config.admission.clone();
        tokio::spawn(async move { http::serve(&admission_config, state).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    resync.abort();
    admission.abort();
    controller.shutdown();
    for worker in workers {
        let _ = worker.await;
    }
    Ok(())
}
