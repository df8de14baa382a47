//! Error taxonomy for vision fallback execution.
//!
//! Only `NotInitialized` and threshold domain errors surface as `Err` from a
//! backend; every expected detection failure is folded into a failed
//! `VisionExecutionResult` instead.

use thiserror::Error;

use crate::models::BackendKind;

#[derive(Debug, Clone, Error)]
pub enum VisionError {
    #[error("vision backend '{0}' is not available")]
    BackendNotAvailable(BackendKind),

    #[error("vision backend '{backend}' failed to initialize: {reason}")]
    InitializationFailed {
        backend: BackendKind,
        reason: String,
    },

    #[error("vision backend '{0}' used before initialize()")]
    NotInitialized(BackendKind),

    #[error("element detection failed: {0}")]
    DetectionFailed(String),

    #[error("no elements found")]
    NoElementsFound,

    #[error("all detections fell below confidence threshold {0}")]
    LowConfidence(f64),

    #[error("vision backend timed out after {0}ms")]
    Timeout(u64),

    #[error("invalid screenshot: {0}")]
    InvalidScreenshot(String),

    #[error("invalid confidence threshold {0}: must be within 0.0..=1.0")]
    InvalidThreshold(f64),

    #[error("unknown vision backend '{0}'")]
    UnknownBackend(String),
}
