use super::CaptureSource;
use anyhow::{Context, Result};
use std::path::Path;

use crate::frame::Frame;

/// Repeats one decoded image on every call.
pub struct StillImage {
    frame: Frame,
}

impl StillImage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let frame = image::open(path)
            .with_context(|| format!("Failed to open image {}", path.display()))?
            .to_rgb8();
        tracing::info!(
            "Loaded still image {} ({}x{})",
            path.display(),
            frame.width(),
            frame.height()
        );
        Ok(Self { frame })
    }

    pub fn from_frame(frame: Frame) -> Self {
        Self { frame }
    }
}

impl CaptureSource for StillImage {
    fn capture_frame(&mut self) -> Result<Option<Frame>> {
        Ok(Some(self.frame.clone()))
    }

    fn resolution(&self) -> (u32, u32) {
        self.frame.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_the_same_frame() {
        let frame = Frame::from_pixel(3, 2, image::Rgb([1, 2, 3]));
        let mut source = StillImage::from_frame(frame.clone());
        assert_eq!(source.resolution(), (3, 2));
        assert_eq!(source.capture_frame().unwrap(), Some(frame.clone()));
        assert_eq!(source.capture_frame().unwrap(), Some(frame));
    }
}
