//! Local set-of-marks detector.
//!
//! Placeholder variant: it satisfies the capability contract so flows can
//! select it, but until a concrete model is wired in the probe reports
//! unavailable and detection yields a failed result set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::errors::VisionError;
use crate::models::{BackendKind, DetectOptions, Screenshot, VisionExecutionResult};
use crate::{check_threshold, VisionBackend};

const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.3;

pub struct SomBackend {
    threshold: RwLock<f64>,
    initialized: AtomicBool,
}

impl SomBackend {
    pub fn new() -> Self {
        Self {
            threshold: RwLock::new(DEFAULT_CONFIDENCE_THRESHOLD),
            initialized: AtomicBool::new(false),
        }
    }
}

impl Default for SomBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VisionBackend for SomBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Som
    }

    async fn is_available(&self) -> bool {
        // No local model integration yet.
        false
    }

    async fn initialize(&self) -> Result<(), VisionError> {
        if !self.is_available().await {
            return Err(VisionError::BackendNotAvailable(BackendKind::Som));
        }
        self.initialized.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn detect_elements(
        &self,
        _screenshot: &Screenshot,
        _options: &DetectOptions,
    ) -> Result<Vec<VisionExecutionResult>, VisionError> {
        if !self.initialized.load(Ordering::Relaxed) {
            return Err(VisionError::NotInitialized(BackendKind::Som));
        }
        Ok(vec![VisionExecutionResult::failed(
            BackendKind::Som,
            "local SOM detector has no model loaded",
            0,
        )])
    }

    fn confidence_threshold(&self) -> f64 {
        self.threshold.read().map(|t| *t).unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD)
    }

    fn set_confidence_threshold(&self, threshold: f64) -> Result<(), VisionError> {
        let threshold = check_threshold(threshold)?;
        if let Ok(mut guard) = self.threshold.write() {
            *guard = threshold;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initialize_fails_when_unavailable() {
        let backend = SomBackend::new();
        assert!(!backend.is_available().await);
        assert!(matches!(
            backend.initialize().await,
            Err(VisionError::BackendNotAvailable(BackendKind::Som))
        ));
    }

    #[tokio::test]
    async fn detect_before_initialize_errors() {
        let backend = SomBackend::new();
        let screenshot = Screenshot::new(Vec::new(), 0, 0);
        assert!(matches!(
            backend
                .detect_elements(&screenshot, &DetectOptions::default())
                .await,
            Err(VisionError::NotInitialized(BackendKind::Som))
        ));
    }

    #[test]
    fn threshold_accessors_enforce_domain() {
        let backend = SomBackend::new();
        assert!((backend.confidence_threshold() - 0.3).abs() < f64::EPSILON);
        backend.set_confidence_threshold(0.7).unwrap();
        assert!((backend.confidence_threshold() - 0.7).abs() < f64::EPSILON);
        assert!(backend.set_confidence_threshold(2.0).is_err());
    }
}
