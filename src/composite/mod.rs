//! Pure compositing functions: region overwrite, mask blending, perspective warp.

mod homography;

pub use homography::{estimate_homography, project, warp_perspective};

use image::{imageops, Rgb};

use crate::error::{PipelineError, Result};
use crate::frame::{BoundingBox, Frame, Mask};

/// How mask weights select between base and patch pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlendMode {
    /// Take the patch pixel where the weight exceeds the threshold, else base.
    Threshold(f32),
    /// Weighted blend, using the mask as a continuous alpha.
    Alpha,
}

impl Default for BlendMode {
    fn default() -> Self {
        BlendMode::Threshold(0.5)
    }
}

/// Paste `patch` into the rectangle `bbox` of `base`.
///
/// The box is clipped to the base bounds first. An empty clipped region is a
/// no-op and returns a copy of `base`. The patch is resampled to the exact
/// region size, so the result always has base's dimensions.
pub fn overlay_region(base: &Frame, patch: &Frame, bbox: &BoundingBox) -> Frame {
    let (width, height) = base.dimensions();
    let Some(region) = bbox.clamp_to(width, height) else {
        tracing::debug!(?bbox, "overlay region outside frame, leaving base untouched");
        return base.clone();
    };
    if patch.width() == 0 || patch.height() == 0 {
        return base.clone();
    }

    let resized = if patch.dimensions() == (region.width, region.height) {
        patch.clone()
    } else {
        imageops::resize(
            patch,
            region.width,
            region.height,
            imageops::FilterType::Lanczos3,
        )
    };

    let mut output = base.clone();
    imageops::replace(&mut output, &resized, region.x as i64, region.y as i64);
    output
}

/// Merge `patch` over `base` using per-pixel mask weights.
///
/// `patch` must match `base` exactly. A mask at a different resolution is
/// resampled to the base resolution before use.
pub fn blend_by_mask(base: &Frame, patch: &Frame, mask: &Mask, mode: BlendMode) -> Result<Frame> {
    if base.dimensions() != patch.dimensions() {
        return Err(PipelineError::DimensionMismatch {
            expected: base.dimensions(),
            actual: patch.dimensions(),
        });
    }

    let (width, height) = base.dimensions();
    let resampled;
    let mask = if mask.dimensions() != (width, height) {
        tracing::debug!(
            "Resampling {}x{} mask to {}x{} frame",
            mask.width(),
            mask.height(),
            width,
            height
        );
        resampled = mask.resized(width, height);
        &resampled
    } else {
        mask
    };

    let output = Frame::from_fn(width, height, |x, y| {
        let b = base.get_pixel(x, y);
        let p = patch.get_pixel(x, y);
        let w = mask.get(x, y);
        match mode {
            BlendMode::Threshold(t) => {
                if w > t {
                    *p
                } else {
                    *b
                }
            }
            BlendMode::Alpha => Rgb([
                mix(b[0], p[0], w),
                mix(b[1], p[1], w),
                mix(b[2], p[2], w),
            ]),
        }
    });
    Ok(output)
}

#[inline]
fn mix(base: u8, patch: u8, weight: f32) -> u8 {
    (patch as f32 * weight + base as f32 * (1.0 - weight))
        .round()
        .clamp(0.0, 255.0) as u8
}
