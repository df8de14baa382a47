//! Template image loading.
//!
//! Steps reference templates either by file path or as an inline base64
//! payload (optionally wrapped in a `data:image/...;base64,` URI). Both are
//! decoded into the raw buffers the matcher operates on.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::errors::MatchError;
use crate::matcher::RgbBuffer;

/// Where a step's template image comes from. Exactly one source is
/// meaningful per step.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    Path(String),
    Base64(String),
}

impl TemplateSource {
    pub fn load(&self) -> Result<RgbBuffer, MatchError> {
        match self {
            Self::Path(path) => load_template_file(Path::new(path)),
            Self::Base64(data) => load_template_base64(data),
        }
    }
}

/// Decode PNG/JPEG bytes into an RGB8 buffer.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<RgbBuffer, MatchError> {
    let img = image::load_from_memory(bytes)?;
    let rgb = img.to_rgb8();
    RgbBuffer::new(rgb.width(), rgb.height(), rgb.into_raw())
}

/// Load a template from disk.
pub fn load_template_file(path: &Path) -> Result<RgbBuffer, MatchError> {
    let bytes = std::fs::read(path)?;
    decode_image_bytes(&bytes)
}

/// Load a template from a base64 payload, stripping an optional
/// `data:image/...;base64,` prefix first.
pub fn load_template_base64(data: &str) -> Result<RgbBuffer, MatchError> {
    let trimmed = data.trim();
    let payload = if trimmed.starts_with("data:") {
        match trimmed.find("base64,") {
            Some(idx) => &trimmed[idx + "base64,".len()..],
            None => trimmed,
        }
    } else {
        trimmed
    };
    let bytes = STANDARD.decode(payload)?;
    decode_image_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 255) as u8, (y * 13 % 255) as u8, 40u8])
        });
        let mut buf = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut buf),
            image::ImageFormat::Png,
        )
        .unwrap();
        buf
    }

    #[test]
    fn decodes_png_bytes() {
        let buffer = decode_image_bytes(&png_bytes(8, 6)).unwrap();
        assert_eq!(buffer.width, 8);
        assert_eq!(buffer.height, 6);
        assert_eq!(buffer.data.len(), 8 * 6 * 3);
    }

    #[test]
    fn loads_base64_with_data_uri_prefix() {
        let encoded = STANDARD.encode(png_bytes(4, 4));
        let uri = format!("data:image/png;base64,{encoded}");
        let buffer = load_template_base64(&uri).unwrap();
        assert_eq!(buffer.width, 4);
        let bare = load_template_base64(&encoded).unwrap();
        assert_eq!(bare.width, 4);
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(matches!(
            load_template_base64("not valid b64!!"),
            Err(MatchError::Base64(_))
        ));
    }

    #[test]
    fn loads_template_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.png");
        std::fs::write(&path, png_bytes(5, 7)).unwrap();
        let buffer = load_template_file(&path).unwrap();
        assert_eq!((buffer.width, buffer.height), (5, 7));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            load_template_file(Path::new("/nonexistent/template.png")),
            Err(MatchError::Io(_))
        ));
    }
}
