//! Object replacement: detect → segment → generative fill → composite.

use image::imageops::{self, FilterType};
use tracing::{debug, info, warn};

use crate::composite::{blend_by_mask, overlay_region, BlendMode};
use crate::error::{PipelineError, Result};
use crate::frame::{BoundingBox, Frame, Mask, Point2};
use crate::vision::{
    select_best_mask, DetectionParams, Detector, GenerativeFill, PointLabel, SegmentPrompt,
    Segmenter,
};

/// How generated content is merged back into the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReplaceStrategy {
    /// Segment each detection and inpaint only inside its mask.
    #[default]
    Inpaint,
    /// Generate a whole new picture and paste it into the first box.
    Overlay,
}

#[derive(Debug, Clone)]
pub struct ReplaceConfig {
    /// Frames with a longer side are downscaled before any model runs.
    pub max_side: u32,
    pub detection: DetectionParams,
    pub strategy: ReplaceStrategy,
    /// Square dilation kernel applied to each mask; 0 disables.
    pub dilation: u8,
    /// Reject the best segmentation candidate below this score.
    pub min_mask_score: Option<f32>,
}

impl Default for ReplaceConfig {
    fn default() -> Self {
        Self {
            max_side: 1024,
            detection: DetectionParams::default(),
            strategy: ReplaceStrategy::Inpaint,
            dilation: 0,
            min_mask_score: None,
        }
    }
}

/// Result of one replacement attempt. Every variant carries a full-size frame.
#[derive(Debug)]
pub enum ReplaceOutcome {
    /// `regions` are in the input frame's pixel space.
    Replaced { frame: Frame, regions: Vec<BoundingBox> },
    /// The detector found nothing; `frame` is the input unchanged.
    NoDetection { frame: Frame },
    /// A stage failed; `frame` is the input unchanged.
    Degraded { frame: Frame, reason: PipelineError },
}

impl ReplaceOutcome {
    pub fn frame(&self) -> &Frame {
        match self {
            ReplaceOutcome::Replaced { frame, .. } => frame,
            ReplaceOutcome::NoDetection { frame } => frame,
            ReplaceOutcome::Degraded { frame, .. } => frame,
        }
    }

    pub fn into_frame(self) -> Frame {
        match self {
            ReplaceOutcome::Replaced { frame, .. } => frame,
            ReplaceOutcome::NoDetection { frame } => frame,
            ReplaceOutcome::Degraded { frame, .. } => frame,
        }
    }
}

/// Working copy of the input, possibly downscaled for the models.
struct WorkingFrame {
    frame: Frame,
    /// original / working, per axis
    scale: (f32, f32),
}

impl WorkingFrame {
    fn new(original: &Frame, max_side: u32) -> Self {
        let (width, height) = original.dimensions();
        let longest = width.max(height);
        if max_side == 0 || longest <= max_side {
            return Self {
                frame: original.clone(),
                scale: (1.0, 1.0),
            };
        }

        let ratio = max_side as f32 / longest as f32;
        let w = ((width as f32 * ratio).round() as u32).max(1);
        let h = ((height as f32 * ratio).round() as u32).max(1);
        debug!("Downscaling {}x{} to {}x{} for inference", width, height, w, h);
        Self {
            frame: imageops::resize(original, w, h, FilterType::Lanczos3),
            scale: (width as f32 / w as f32, height as f32 / h as f32),
        }
    }

    fn is_scaled(&self) -> bool {
        self.scale != (1.0, 1.0)
    }

    fn to_original(&self, bbox: &BoundingBox) -> BoundingBox {
        bbox.scaled(self.scale.0, self.scale.1)
    }

    fn to_working(&self, point: Point2) -> Point2 {
        Point2::new(point.x / self.scale.0, point.y / self.scale.1)
    }
}

/// Replaces objects named by a text prompt with generated content.
///
/// Holds one long-lived session per model, constructed once by the caller.
pub struct ObjectReplacer<D: Detector, S: Segmenter, G: GenerativeFill> {
    detector: D,
    segmenter: S,
    fill: G,
    config: ReplaceConfig,
}

impl<D: Detector, S: Segmenter, G: GenerativeFill> ObjectReplacer<D, S, G> {
    pub fn new(detector: D, segmenter: S, fill: G, config: ReplaceConfig) -> Self {
        Self {
            detector,
            segmenter,
            fill,
            config,
        }
    }

    pub fn config(&self) -> &ReplaceConfig {
        &self.config
    }

    /// Find every `target` in the frame and replace it with `replacement`.
    pub fn replace(&mut self, frame: &Frame, target: &str, replacement: &str) -> ReplaceOutcome {
        let _span = tracing::info_span!("replace", prompt = target).entered();
        match self.try_replace(frame, target, replacement) {
            Ok(Some((output, regions))) => {
                info!("Replaced {} region(s) matching {:?}", regions.len(), target);
                ReplaceOutcome::Replaced {
                    frame: output,
                    regions,
                }
            }
            Ok(None) => {
                info!("No detection for {:?}", target);
                ReplaceOutcome::NoDetection {
                    frame: frame.clone(),
                }
            }
            Err(reason) => {
                warn!("Replacement degraded: {}", reason);
                ReplaceOutcome::Degraded {
                    frame: frame.clone(),
                    reason,
                }
            }
        }
    }

    /// Replace the object under a single point prompt, skipping detection.
    pub fn replace_at_point(
        &mut self,
        frame: &Frame,
        point: Point2,
        label: PointLabel,
        replacement: &str,
    ) -> ReplaceOutcome {
        let _span = tracing::info_span!("replace_at_point").entered();
        let working = WorkingFrame::new(frame, self.config.max_side);
        let prompt = SegmentPrompt::Point {
            point: working.to_working(point),
            label,
        };

        let result = self.inpaint_region(&working.frame, &prompt, replacement).and_then(
            |(generated, mask)| {
                let region = mask_bounds(&mask).map(|b| working.to_original(&b));
                let output = restore(frame, &working, &generated, &mask)?;
                Ok((output, region.into_iter().collect::<Vec<_>>()))
            },
        );

        match result {
            Ok((output, regions)) => ReplaceOutcome::Replaced {
                frame: output,
                regions,
            },
            Err(reason) => {
                warn!("Point replacement degraded: {}", reason);
                ReplaceOutcome::Degraded {
                    frame: frame.clone(),
                    reason,
                }
            }
        }
    }

    fn try_replace(
        &mut self,
        frame: &Frame,
        target: &str,
        replacement: &str,
    ) -> Result<Option<(Frame, Vec<BoundingBox>)>> {
        let working = WorkingFrame::new(frame, self.config.max_side);
        let detections = self
            .detector
            .detect(&working.frame, target, &self.config.detection)?;
        if detections.is_empty() {
            return Ok(None);
        }
        for d in &detections {
            debug!("{:?} {:.2} at {:?}", d.phrase, d.confidence, d.bbox);
        }

        let regions: Vec<BoundingBox> = detections
            .iter()
            .map(|d| working.to_original(&d.bbox))
            .collect();

        let output = match self.config.strategy {
            ReplaceStrategy::Overlay => {
                let (w, h) = working.frame.dimensions();
                let generated = self.fill.fill(&working.frame, &Mask::full(w, h), replacement)?;
                overlay_region(frame, &generated, &regions[0])
            }
            ReplaceStrategy::Inpaint => {
                let (w, h) = working.frame.dimensions();
                let mut current = working.frame.clone();
                let mut union = Mask::new(w, h);
                for detection in &detections {
                    let prompt = SegmentPrompt::Box(detection.bbox);
                    let (generated, mask) = self.inpaint_region(&current, &prompt, replacement)?;
                    current = generated;
                    union = union_of(&union, &mask);
                }
                restore(frame, &working, &current, &union)?
            }
        };

        Ok(Some((output, regions)))
    }

    /// Segment one prompt, fill inside the mask and blend the fill back.
    fn inpaint_region(
        &mut self,
        frame: &Frame,
        prompt: &SegmentPrompt,
        replacement: &str,
    ) -> Result<(Frame, Mask)> {
        let candidates = self.segmenter.segment(frame, prompt)?;
        let best = select_best_mask(candidates, frame.dimensions(), self.config.min_mask_score)?;
        debug!("Mask score {:.3}, area {}", best.score, best.mask.area());

        let mask = best.mask.dilated(self.config.dilation);
        if mask.area() == 0 {
            return Err(PipelineError::segmentation_failed("selected mask is empty"));
        }

        let generated = self.fill.fill(frame, &mask, replacement)?;
        let blended = blend_by_mask(frame, &generated, &mask, BlendMode::default())?;
        Ok((blended, mask))
    }
}

/// Bring a working-resolution result back to the input frame.
///
/// Only masked pixels are taken from the upscaled result, so untouched areas
/// keep their original detail.
fn restore(original: &Frame, working: &WorkingFrame, result: &Frame, mask: &Mask) -> Result<Frame> {
    if !working.is_scaled() {
        return Ok(result.clone());
    }
    let (width, height) = original.dimensions();
    let upscaled = imageops::resize(result, width, height, FilterType::Lanczos3);
    blend_by_mask(original, &upscaled, mask, BlendMode::default())
}

fn union_of(a: &Mask, b: &Mask) -> Mask {
    Mask::from_fn(a.width(), a.height(), |x, y| a.get(x, y).max(b.get(x, y)))
}

/// Tight box around the pixels with weight above 0.5.
fn mask_bounds(mask: &Mask) -> Option<BoundingBox> {
    let (mut x1, mut y1, mut x2, mut y2) = (u32::MAX, u32::MAX, 0u32, 0u32);
    let mut any = false;
    for y in 0..mask.height() {
        for x in 0..mask.width() {
            if mask.get(x, y) > 0.5 {
                any = true;
                x1 = x1.min(x);
                y1 = y1.min(y);
                x2 = x2.max(x + 1);
                y2 = y2.max(y + 1);
            }
        }
    }
    any.then(|| BoundingBox::new(x1 as f32, y1 as f32, x2 as f32, y2 as f32))
}
