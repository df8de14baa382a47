//! Screenshot-space geometry and page-coordinate projection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Axis-aligned box in screenshot-pixel space unless a producer documents a
/// normalized (0..1) convention of its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point of the box.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Integer point in page (CSS pixel) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagePoint {
    pub x: i64,
    pub y: i64,
}

/// Offset applied when the screenshot was a crop of the full page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CropOffset {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProjectionError {
    #[error("degenerate capture dimensions {width}x{height}")]
    DegenerateCapture { width: f64, height: f64 },
}

/// Map a bounding box detected on a screenshot back onto live page
/// coordinates.
///
/// The capture scale rarely equals 1:1 (device pixel ratio, downscaled
/// uploads), so the box center is rescaled by page/screenshot per axis and
/// the optional crop offset is added afterwards. The result is rounded to
/// the nearest integer pixel.
pub fn project_to_page(
    bbox: &BoundingBox,
    screenshot_width: f64,
    screenshot_height: f64,
    page_width: f64,
    page_height: f64,
    crop: CropOffset,
) -> Result<PagePoint, ProjectionError> {
    if screenshot_width <= 0.0 || screenshot_height <= 0.0 {
        return Err(ProjectionError::DegenerateCapture {
            width: screenshot_width,
            height: screenshot_height,
        });
    }

    let scale_x = page_width / screenshot_width;
    let scale_y = page_height / screenshot_height;
    let (cx, cy) = bbox.center();

    Ok(PagePoint {
        x: (cx * scale_x + crop.x).round() as i64,
        y: (cy * scale_y + crop.y).round() as i64,
    })
}
