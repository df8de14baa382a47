//! Error types for template loading and matching.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid match threshold {0}: must be within 0.0..=1.0")]
    InvalidThreshold(f64),

    #[error("pixel buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("failed to decode template image: {0}")]
    Decode(String),

    #[error("invalid base64 template data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("template source missing: provide a file path or inline data")]
    MissingSource,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for MatchError {
    fn from(err: image::ImageError) -> Self {
        Self::Decode(err.to_string())
    }
}
