//! Domain errors for the custodian retention controller.
//!
//! Every error that crosses a port boundary is classified into a small
//! taxonomy so that handlers, reactors, and metrics can make uniform
//! propagation decisions without inspecting message text.

use thiserror::Error;

/// Classification of an error, used for metrics tagging and for deciding
/// whether a failure is swallowed, requeued, or surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The target object does not exist.
    NotFound,
    /// The object changed underneath the operation.
    Conflict,
    /// The remote store did not answer in time.
    Timeout,
    /// The caller is not authorized for the operation.
    Permission,
    /// The input failed validation.
    Validation,
    /// Transient remote API failure.
    Api,
    /// A bug or broken invariant on our side.
    Internal,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not-found",
            Self::Conflict => "conflict",
            Self::Timeout => "timeout",
            Self::Permission => "permission",
            Self::Validation => "validation",
            Self::Api => "api",
            Self::Internal => "internal",
        }
    }
}

/// Errors surfaced by the workload store and the other external
/// collaborators behind the ports in [`crate::domain::ports`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The named object does not exist (or no longer exists).
    #[error("{0} not found")]
    NotFound(String),

    /// The object was modified concurrently; the operation should be retried
    /// on a fresh observation.
    #[error("conflict on {0}: {1}")]
    Conflict(String, String),

    /// The store did not respond within its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The controller lacks permission for the operation.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Transient remote failure; safe to retry later.
    #[error("api error: {0}")]
    Api(String),

    /// Invariant violation on our side.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Taxonomy bucket for this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Conflict(_, _) => ErrorClass::Conflict,
            Self::Timeout(_) => ErrorClass::Timeout,
            Self::Permission(_) => ErrorClass::Permission,
            Self::Api(_) => ErrorClass::Api,
            Self::Internal(_) => ErrorClass::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_, _))
    }
}
