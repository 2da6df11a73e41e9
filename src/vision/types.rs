use crate::error::{PipelineError, Result};
use crate::frame::{BoundingBox, Frame, LandmarkSet, Mask, Point2};

/// One detector hit: box in frame pixels, confidence and the matched phrase.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub phrase: String,
}

/// Score cut-offs for text-prompted detection, both in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    pub box_threshold: f32,
    pub text_threshold: f32,
}

impl DetectionParams {
    pub fn new(box_threshold: f32, text_threshold: f32) -> Self {
        Self {
            box_threshold: box_threshold.clamp(0.0, 1.0),
            text_threshold: text_threshold.clamp(0.0, 1.0),
        }
    }
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self::new(0.35, 0.25)
    }
}

/// Trait for text-prompted object detectors
///
/// An empty result means "nothing matched" and is not an error. Errors are
/// reserved for the model failing to produce output at all.
pub trait Detector {
    fn detect(
        &mut self,
        frame: &Frame,
        prompt: &str,
        params: &DetectionParams,
    ) -> Result<Vec<Detection>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointLabel {
    Foreground,
    Background,
}

impl PointLabel {
    pub fn as_int(self) -> u8 {
        match self {
            PointLabel::Foreground => 1,
            PointLabel::Background => 0,
        }
    }
}

/// Exactly one prompt per segmentation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentPrompt {
    Box(BoundingBox),
    Point { point: Point2, label: PointLabel },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMask {
    pub mask: Mask,
    pub score: f32,
}

/// Trait for promptable segmentation models
pub trait Segmenter {
    /// Return candidate masks at the frame's resolution with confidence scores.
    fn segment(&mut self, frame: &Frame, prompt: &SegmentPrompt) -> Result<Vec<ScoredMask>>;
}

/// Pick the highest-scoring candidate.
///
/// Fails with `SegmentationFailed` when there are no candidates or when the best
/// one is below `min_score`. A mask at the wrong resolution is resampled so the
/// result always matches `frame_size`.
pub fn select_best_mask(
    candidates: Vec<ScoredMask>,
    frame_size: (u32, u32),
    min_score: Option<f32>,
) -> Result<ScoredMask> {
    let best = candidates
        .into_iter()
        .filter(|c| c.score.is_finite())
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .ok_or_else(|| PipelineError::segmentation_failed("segmenter returned no masks"))?;

    if let Some(min) = min_score {
        if best.score < min {
            return Err(PipelineError::segmentation_failed(format!(
                "best mask score {:.3} below minimum {:.3}",
                best.score, min
            )));
        }
    }

    if best.mask.dimensions() != frame_size {
        return Ok(ScoredMask {
            mask: best.mask.resized(frame_size.0, frame_size.1),
            score: best.score,
        });
    }
    Ok(best)
}

/// Trait for generative fill: new content inside the mask, full frame size out
pub trait GenerativeFill {
    fn fill(&mut self, frame: &Frame, mask: &Mask, prompt: &str) -> Result<Frame>;
}

/// Trait for inpainting backends that work at one fixed square resolution
///
/// [`super::ResizingFill`] adapts these to [`GenerativeFill`].
pub trait InpaintModel {
    /// Side length the model requires (a multiple of 8).
    fn native_size(&self) -> u32;

    fn inpaint(&mut self, image: &Frame, mask: &Mask, prompt: &str) -> Result<Frame>;
}

/// Trait for facial landmark estimators
pub trait LandmarkModel {
    /// Landmarks of the most prominent face in frame pixels, or `None` if no face.
    fn landmarks(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>>;

    /// Get the model's preferred input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);

    /// Drop any region carried over from the previous call so the next one
    /// searches the full frame.
    fn reset_tracking(&mut self) {}
}
