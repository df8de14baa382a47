//! Vision-backed element detection for the FlowPilot fallback chain.
//!
//! Three implementations sit behind one capability trait: a local
//! set-of-marks placeholder, a remote element-parsing service client, and a
//! hosted vision-language model. The concrete variant is constructed once at
//! executor-setup time from the flow's `vision_backend` field.

use std::sync::Arc;

use async_trait::async_trait;

pub mod errors;
pub mod models;
pub mod omniparser;
pub mod openai;
pub mod som;

pub use errors::VisionError;
pub use models::{
    BackendKind, DetectOptions, Screenshot, VisionExecutionResult, VisionResult,
};
pub use omniparser::OmniParserBackend;
pub use openai::OpenAiBackend;
pub use som::SomBackend;

/// Capability contract implemented by every backend variant.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> BackendKind;

    /// Non-throwing liveness probe.
    async fn is_available(&self) -> bool;

    /// Prepare the backend; fails with `BackendNotAvailable` when the probe
    /// does not pass.
    async fn initialize(&self) -> Result<(), VisionError>;

    /// Locate elements matching the options on the screenshot. Expected
    /// failure paths come back as failed results, never as `Err`; only using
    /// the backend before `initialize()` errors.
    async fn detect_elements(
        &self,
        screenshot: &Screenshot,
        options: &DetectOptions,
    ) -> Result<Vec<VisionExecutionResult>, VisionError>;

    fn confidence_threshold(&self) -> f64;

    fn set_confidence_threshold(&self, threshold: f64) -> Result<(), VisionError>;
}

/// Settings needed to construct a concrete backend.
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    /// Base URL of the remote parser service (OmniParser).
    pub api_url: Option<String>,
    /// API key for the hosted model (OpenAI).
    pub api_key: Option<String>,
    /// Hosted model name override.
    pub model: Option<String>,
    /// Default OCR language hint.
    pub ocr_language: Option<String>,
}

/// Build the backend selected by a flow.
pub fn create_backend(kind: BackendKind, config: &BackendConfig) -> Arc<dyn VisionBackend> {
    match kind {
        BackendKind::Som => Arc::new(SomBackend::new()),
        BackendKind::OmniParser => Arc::new(OmniParserBackend::new(
            config.api_url.clone().unwrap_or_default(),
        )),
        BackendKind::OpenAi => Arc::new(OpenAiBackend::new(
            config.api_url.clone(),
            config.api_key.clone(),
            config.model.clone(),
        )),
    }
}

/// Shared threshold validation for the backend implementations.
pub(crate) fn check_threshold(threshold: f64) -> Result<f64, VisionError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(VisionError::InvalidThreshold(threshold))
    }
}
