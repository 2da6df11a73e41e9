use image::imageops;
use ndarray::Array4;

use crate::frame::Frame;

/// Per-channel normalisation applied after scaling samples to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Normalization {
    /// Keep [0, 1]
    Unit,
    /// Map to [-1, 1]
    Symmetric,
}

/// Preprocessor for converting RGB frames to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
    normalization: Normalization,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
            normalization: Normalization::Unit,
        }
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Resize to the target size with Lanczos3 (no-op when already there).
    pub fn resize(&self, frame: &Frame) -> Frame {
        if frame.dimensions() == (self.target_width, self.target_height) {
            return frame.clone();
        }
        imageops::resize(
            frame,
            self.target_width,
            self.target_height,
            imageops::FilterType::Lanczos3,
        )
    }

    /// Preprocess an RGB frame into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Convert to float and normalize
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, frame: &Frame) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized = self.resize(frame);
        let (width, height) = resized.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let v = pixel[c] as f32 / 255.0;
                let v = match self.normalization {
                    Normalization::Unit => v,
                    Normalization::Symmetric => v * 2.0 - 1.0,
                };
                tensor[[0, c, y as usize, x as usize]] = v;
            }
        }

        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_is_nchw_at_target_size() {
        let frame = Frame::from_pixel(40, 20, image::Rgb([255, 0, 51]));
        let tensor = Preprocessor::new(16, 8).preprocess(&frame);
        assert_eq!(tensor.shape(), &[1, 3, 8, 16]);
        assert!((tensor[[0, 0, 4, 4]] - 1.0).abs() < 1e-2);
        assert!(tensor[[0, 1, 4, 4]].abs() < 1e-2);
        assert!((tensor[[0, 2, 4, 4]] - 0.2).abs() < 1e-2);
    }

    #[test]
    fn symmetric_normalization_spans_minus_one_to_one() {
        let frame = Frame::from_fn(2, 1, |x, _| {
            if x == 0 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        });
        let tensor = Preprocessor::new(2, 1)
            .with_normalization(Normalization::Symmetric)
            .preprocess(&frame);
        assert!((tensor[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 0, 0, 1]] - 1.0).abs() < 1e-6);
    }
}
