//! Prometheus instruments for the controller.
//!
//! One registry per process; the admission router serves it on `/metrics`.

use dashmap::DashMap;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::domain::errors::ErrorClass;
use crate::domain::models::WorkloadKind;

/// Handler label values used on deletion and duration instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Ttl,
    History,
    Sweep,
}

impl Handler {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ttl => "ttl",
            Self::History => "history",
            Self::Sweep => "sweep",
        }
    }
}

/// Process-wide metrics. Cheap to clone behind an `Arc`; all instruments
/// are internally synchronized.
pub struct Metrics {
    registry: Registry,
    deletions: IntCounterVec,
    errors: IntCounterVec,
    handler_duration: HistogramVec,
    sweeps: IntCounter,
    workloads_observed: IntGauge,
    /// Process-lifetime set of every workload UID seen, backing the
    /// uniqueness gauge.
    seen_uids: DashMap<String, ()>,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let deletions = IntCounterVec::new(
            Opts::new(
                "custodian_deletions_total",
                "Workload deletions by kind, handler, and outcome",
            ),
            &["kind", "handler", "outcome"],
        )
        .expect("deletions counter opts are static");

        let errors = IntCounterVec::new(
            Opts::new("custodian_errors_total", "Errors by taxonomy class"),
            &["class"],
        )
        .expect("errors counter opts are static");

        let handler_duration = HistogramVec::new(
            HistogramOpts::new(
                "custodian_handler_duration_seconds",
                "Handler execution durations",
            ),
            &["handler"],
        )
        .expect("duration histogram opts are static");

        let sweeps = IntCounter::new("custodian_sweeps_total", "Completed cluster sweeps")
            .expect("sweep counter opts are static");

        let workloads_observed = IntGauge::new(
            "custodian_workloads_observed",
            "Unique workload UIDs observed since process start",
        )
        .expect("gauge opts are static");

        for collector in [
            Box::new(deletions.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(errors.clone()),
            Box::new(handler_duration.clone()),
            Box::new(sweeps.clone()),
            Box::new(workloads_observed.clone()),
        ] {
            registry
                .register(collector)
                .expect("collectors register once");
        }

        Self {
            registry,
            deletions,
            errors,
            handler_duration,
            sweeps,
            workloads_observed,
            seen_uids: DashMap::new(),
        }
    }

    pub fn record_deletion(&self, kind: WorkloadKind, handler: Handler, outcome: &str) {
        self.deletions
            .with_label_values(&[kind.as_str(), handler.as_str(), outcome])
            .inc();
    }

    pub fn record_error(&self, class: ErrorClass) {
        self.errors.with_label_values(&[class.as_str()]).inc();
    }

    pub fn observe_duration(&self, handler: Handler, seconds: f64) {
        self.handler_duration
            .with_label_values(&[handler.as_str()])
            .observe(seconds);
    }

    pub fn record_sweep(&self) {
        self.sweeps.inc();
    }

    /// Count a workload toward the uniqueness gauge on first sight of its UID.
    pub fn observe_workload(&self, uid: &str) {
        if uid.is_empty() {
            return;
        }
        if self
            .seen_uids
            .insert(uid.to_string(), ())
            .is_none()
        {
            self.workloads_observed.inc();
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
