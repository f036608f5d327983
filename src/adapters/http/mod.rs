//! HTTP adapters: the admission endpoint plus health and metrics routes.

pub mod admission;

pub use admission::{
    evaluate_review, router, serve, AdmissionResponse, AdmissionReview, AdmissionState, Operation,
};
