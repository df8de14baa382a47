//! Brute-force normalized cross-correlation matcher.

use serde::{Deserialize, Serialize};

use crate::errors::MatchError;

/// Horizontal and vertical scan stride in pixels. Fixed performance/precision
/// tradeoff; icon-sized templates still land within a pixel of the optimum.
const SCAN_STRIDE: usize = 2;

/// Tolerance when comparing the best score against the threshold, so an
/// exact match still passes a threshold of 1.0 despite rounding.
const SCORE_EPSILON: f64 = 1e-9;

/// Raw interleaved RGB8 pixel buffer.
#[derive(Debug, Clone)]
pub struct RgbBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbBuffer {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, MatchError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(MatchError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Grayscale conversion by equal-weight channel average. Deliberately not
    /// a perceptual luma weighting: the reference matcher averages channels.
    fn to_gray(&self) -> Vec<f64> {
        self.data
            .chunks_exact(3)
            .map(|px| (px[0] as f64 + px[1] as f64 + px[2] as f64) / 3.0)
            .collect()
    }
}

/// Best match of a template within a screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplateMatchResult {
    /// Center of the matched window, screenshot-pixel space.
    pub x: u32,
    pub y: u32,
    pub confidence: f64,
    pub width: u32,
    pub height: u32,
}

pub struct TemplateMatcher;

impl TemplateMatcher {
    /// Slide `template` over `screenshot` and return the best-scoring
    /// position when its NCC reaches `threshold`.
    ///
    /// Degenerate windows (constant color on either side) score 0, so they
    /// can only win when every candidate window is degenerate. Complexity is
    /// O(W·H·Tw·Th / stride²); screenshots are viewport-bounded and templates
    /// icon-sized, so brute force is acceptable here.
    pub fn find(
        screenshot: &RgbBuffer,
        template: &RgbBuffer,
        threshold: f64,
    ) -> Result<Option<TemplateMatchResult>, MatchError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MatchError::InvalidThreshold(threshold));
        }
        if template.width > screenshot.width || template.height > screenshot.height {
            tracing::debug!(
                template_w = template.width,
                template_h = template.height,
                screenshot_w = screenshot.width,
                screenshot_h = screenshot.height,
                "template larger than screenshot, skipping scan"
            );
            return Ok(None);
        }
        if template.width == 0 || template.height == 0 {
            return Ok(None);
        }

        let shot = screenshot.to_gray();
        let tpl = template.to_gray();

        let sw = screenshot.width as usize;
        let tw = template.width as usize;
        let th = template.height as usize;
        let n = (tw * th) as f64;

        let sum_t: f64 = tpl.iter().sum();
        let sum_t2: f64 = tpl.iter().map(|v| v * v).sum();
        let mean_t = sum_t / n;
        let denom_t = (sum_t2 - n * mean_t * mean_t).max(0.0).sqrt();

        let max_x = screenshot.width as usize - tw;
        let max_y = screenshot.height as usize - th;

        let mut best: Option<(usize, usize, f64)> = None;
        let mut y = 0;
        while y <= max_y {
            let mut x = 0;
            while x <= max_x {
                let score = ncc_at(&shot, sw, &tpl, tw, th, x, y, n, mean_t, denom_t);
                if best.map_or(true, |(_, _, b)| score > b) {
                    best = Some((x, y, score));
                }
                x += SCAN_STRIDE;
            }
            y += SCAN_STRIDE;
        }

        Ok(best.and_then(|(x, y, score)| {
            if score + SCORE_EPSILON >= threshold {
                Some(TemplateMatchResult {
                    x: (x + tw / 2) as u32,
                    y: (y + th / 2) as u32,
                    confidence: score,
                    width: template.width,
                    height: template.height,
                })
            } else {
                tracing::debug!(best_score = score, threshold, "no template match");
                None
            }
        }))
    }
}

/// NCC of the template against the screenshot window at (x, y).
///
/// NCC = (ΣST − n·meanS·meanT) / (√(ΣS² − n·meanS²) · √(ΣT² − n·meanT²)).
/// Either denominator collapsing to zero means a constant-color window; that
/// position scores 0 rather than producing a NaN.
#[allow(clippy::too_many_arguments)]
fn ncc_at(
    shot: &[f64],
    shot_width: usize,
    tpl: &[f64],
    tpl_width: usize,
    tpl_height: usize,
    x: usize,
    y: usize,
    n: f64,
    mean_t: f64,
    denom_t: f64,
) -> f64 {
    let mut sum_s = 0.0;
    let mut sum_s2 = 0.0;
    let mut sum_st = 0.0;

    for ty in 0..tpl_height {
        let shot_row = (y + ty) * shot_width + x;
        let tpl_row = ty * tpl_width;
        for tx in 0..tpl_width {
            let s = shot[shot_row + tx];
            let t = tpl[tpl_row + tx];
            sum_s += s;
            sum_s2 += s * s;
            sum_st += s * t;
        }
    }

    let mean_s = sum_s / n;
    let denom_s = (sum_s2 - n * mean_s * mean_s).max(0.0).sqrt();
    if denom_s <= f64::EPSILON || denom_t <= f64::EPSILON {
        return 0.0;
    }

    (sum_st - n * mean_s * mean_t) / (denom_s * denom_t)
}
