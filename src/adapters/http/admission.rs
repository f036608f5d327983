//! Admission endpoint for configuration objects.
//!
//! Stateless validation over CREATE/UPDATE/DELETE reviews. Unparsable input
//! is admitted: a payload the endpoint cannot read is benign here and will
//! fail validation again on load, whereas rejecting it could lock operators
//! out of their own configuration. Everything else goes through the full
//! rule list, with the stored global policy backing the cross-object rules.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::domain::models::{AdmissionConfig, ConfigObject};
use crate::infrastructure::metrics::Metrics;
use crate::services::validator::{PolicyValidator, ValidationCode};

/// The operation under review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Incoming review envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    pub operation: Operation,
    #[serde(default)]
    pub object: Option<serde_json::Value>,
    /// The prior state, populated on DELETE.
    #[serde(default)]
    pub old_object: Option<serde_json::Value>,
}

/// Review verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AdmissionResponse {
    fn allow() -> Self {
        Self {
            allowed: true,
            status: None,
            message: None,
        }
    }

    fn allow_with_note(message: String) -> Self {
        Self {
            allowed: true,
            status: None,
            message: Some(message),
        }
    }

    fn reject(code: ValidationCode, message: String) -> Self {
        Self {
            allowed: false,
            status: Some(code.as_str().to_string()),
            message: Some(message),
        }
    }
}

/// Shared endpoint state.
#[derive(Clone)]
pub struct AdmissionState {
    pub validator: Arc<PolicyValidator>,
    pub metrics: Arc<Metrics>,
}

/// Decide one review. Pure apart from reads of the stored global policy.
pub fn evaluate_review(validator: &PolicyValidator, body: &[u8]) -> AdmissionResponse {
    let review: AdmissionReview = match serde_json::from_slice(body) {
        Ok(review) => review,
        Err(err) => {
            warn!(error = %err, "admitting unparsable review envelope");
            return AdmissionResponse::allow_with_note(format!(
                "review not parsable ({err}); admitted"
            ));
        }
    };

    let raw = match review.operation {
        Operation::Delete => review.old_object.or(review.object),
        _ => review.object,
    };
    let Some(raw) = raw else {
        return AdmissionResponse::allow();
    };
    let object: ConfigObject = match serde_json::from_value(raw) {
        Ok(object) => object,
        Err(err) => {
            warn!(error = %err, "admitting unparsable configuration object");
            return AdmissionResponse::allow_with_note(format!(
                "object not parsable ({err}); admitted"
            ));
        }
    };

    let verdict = match review.operation {
        Operation::Create | Operation::Update => validator.validate_object(&object),
        Operation::Delete => validator.validate_delete(&object),
    };

    match verdict {
        Ok(()) => AdmissionResponse::allow(),
        Err(err) if err.code() == ValidationCode::Parse => {
            warn!(object = %object.name, error = %err, "admitting object with unparsable payload");
            AdmissionResponse::allow_with_note(format!("{err}; admitted"))
        }
        Err(err) => {
            info!(
                object = %object.name,
                namespace = %object.namespace,
                code = err.code().as_str(),
                "rejected configuration object: {err}"
            );
            AdmissionResponse::reject(err.code(), err.to_string())
        }
    }
}

async fn validate(State(state): State<AdmissionState>, body: Bytes) -> Json<AdmissionResponse> {
    Json(evaluate_review(&state.validator, &body))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AdmissionState>) -> String {
    state.metrics.encode()
}

/// Admission router: `POST /validate`, `GET /healthz`, `GET /metrics`.
pub fn router(state: AdmissionState) -> Router {
    Router::new()
        .route("/validate", post(validate))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve the admission endpoint until the task is cancelled.
pub async fn serve(config: &AdmissionConfig, state: AdmissionState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "admission endpoint listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
