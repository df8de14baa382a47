//! Template matching for the FlowPilot fallback chain.
//!
//! The matcher itself is pure over raw pixel buffers; decoding image bytes
//! and resolving template sources (file path or inline base64) is the
//! loader's job.

pub mod errors;
pub mod loader;
pub mod matcher;

pub use errors::MatchError;
pub use loader::{decode_image_bytes, load_template_base64, load_template_file, TemplateSource};
pub use matcher::{RgbBuffer, TemplateMatchResult, TemplateMatcher};
