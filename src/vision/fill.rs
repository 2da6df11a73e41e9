use super::types::{GenerativeFill, InpaintModel};
use image::imageops::{self, FilterType};

use crate::error::{PipelineError, Result};
use crate::frame::{Frame, Mask};

/// Adapts a fixed-resolution [`InpaintModel`] to arbitrary frame sizes.
///
/// The frame goes through Lanczos3 and the mask through Triangle on the way in;
/// the generated image comes back through Lanczos3.
pub struct ResizingFill<M: InpaintModel> {
    model: M,
}

impl<M: InpaintModel> ResizingFill<M> {
    pub fn new(model: M) -> Result<Self> {
        let side = model.native_size();
        if side == 0 || side % 8 != 0 {
            return Err(PipelineError::generation_failed(format!(
                "native size {side} is not a positive multiple of 8"
            )));
        }
        Ok(Self { model })
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<M: InpaintModel> GenerativeFill for ResizingFill<M> {
    fn fill(&mut self, frame: &Frame, mask: &Mask, prompt: &str) -> Result<Frame> {
        let _span = tracing::debug_span!("generative_fill").entered();
        let (width, height) = frame.dimensions();
        let side = self.model.native_size();

        let image = if (width, height) == (side, side) {
            frame.clone()
        } else {
            imageops::resize(frame, side, side, FilterType::Lanczos3)
        };
        let model_mask = mask.resized(side, side);

        tracing::debug!(
            "Inpainting {}x{} at {}x{} ({} masked px)",
            width,
            height,
            side,
            side,
            model_mask.area()
        );
        let generated = self.model.inpaint(&image, &model_mask, prompt)?;

        if generated.dimensions() != (side, side) {
            return Err(PipelineError::generation_failed(format!(
                "model returned {:?}, expected {side}x{side}",
                generated.dimensions()
            )));
        }

        if (width, height) == (side, side) {
            return Ok(generated);
        }
        Ok(imageops::resize(&generated, width, height, FilterType::Lanczos3))
    }
}
