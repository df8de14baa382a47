//! Data models shared by the vision backends.

use std::fmt;
use std::str::FromStr;

use flowpilot_core_types::BoundingBox;
use serde::{Deserialize, Serialize};

use crate::errors::VisionError;

/// Which backend implementation a flow selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local set-of-marks detector (placeholder until a model is wired in).
    Som,
    /// Remote element-parsing service (Gradio submit/poll protocol).
    OmniParser,
    /// Hosted vision-language model (chat-completions endpoint).
    OpenAi,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Som => "som",
            Self::OmniParser => "omniparser",
            Self::OpenAi => "openai",
        }
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::OmniParser
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "som" => Ok(Self::Som),
            "omniparser" => Ok(Self::OmniParser),
            "openai" => Ok(Self::OpenAi),
            other => Err(VisionError::UnknownBackend(other.to_string())),
        }
    }
}

/// Screenshot handed to a backend: encoded PNG bytes plus pixel dimensions.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Screenshot {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }
}

/// Detection request options.
#[derive(Debug, Clone, Default)]
pub struct DetectOptions {
    /// Natural-language instruction for the backend.
    pub prompt: Option<String>,
    /// Per-call confidence threshold override.
    pub threshold: Option<f64>,
    /// Keep at most this many results, best first.
    pub top_k: Option<usize>,
    /// Keep only elements whose text mentions this target.
    pub target: Option<String>,
    /// OCR language hint for text extraction backends.
    pub ocr_language: Option<String>,
}

/// One detected element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionResult {
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub label: Option<String>,
    pub element_id: Option<String>,
}

/// Outcome of one detection call. Expected failures are encoded here rather
/// than raised, so the executor can record them and move on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionExecutionResult {
    pub success: bool,
    pub error: Option<String>,
    pub processing_time_ms: u64,
    pub backend: BackendKind,
    pub results: Vec<VisionResult>,
}

impl VisionExecutionResult {
    pub fn succeeded(backend: BackendKind, results: Vec<VisionResult>, elapsed_ms: u64) -> Self {
        Self {
            success: true,
            error: None,
            processing_time_ms: elapsed_ms,
            backend,
            results,
        }
    }

    pub fn failed(backend: BackendKind, error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            processing_time_ms: elapsed_ms,
            backend,
            results: Vec::new(),
        }
    }

    /// Highest-confidence detection, if any.
    pub fn best(&self) -> Option<&VisionResult> {
        self.results.iter().max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_round_trips_through_strings() {
        for (text, kind) in [
            ("som", BackendKind::Som),
            ("omniparser", BackendKind::OmniParser),
            ("openai", BackendKind::OpenAi),
        ] {
            assert_eq!(text.parse::<BackendKind>().unwrap(), kind);
            assert_eq!(kind.as_str(), text);
        }
        assert!("clipseg".parse::<BackendKind>().is_err());
    }

    #[test]
    fn backend_kind_parse_is_case_insensitive() {
        assert_eq!(
            "OmniParser".parse::<BackendKind>().unwrap(),
            BackendKind::OmniParser
        );
    }

    #[test]
    fn best_picks_highest_confidence() {
        let result = VisionExecutionResult::succeeded(
            BackendKind::OmniParser,
            vec![
                VisionResult {
                    bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
                    confidence: 0.4,
                    label: Some("a".into()),
                    element_id: None,
                },
                VisionResult {
                    bbox: BoundingBox::new(5.0, 5.0, 10.0, 10.0),
                    confidence: 0.9,
                    label: Some("b".into()),
                    element_id: None,
                },
            ],
            12,
        );
        assert_eq!(result.best().unwrap().label.as_deref(), Some("b"));
    }
}
