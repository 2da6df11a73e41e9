mod still;
mod v4l_capture;
mod video_file;

pub use still::StillImage;
pub use v4l_capture::WebcamCapture;
pub use video_file::VideoFileCapture;

use anyhow::Result;

use crate::frame::Frame;

/// Trait for frame sources (camera, video file, still image)
pub trait CaptureSource {
    /// Capture a single frame
    ///
    /// Returns `Ok(None)` once a finite source is exhausted.
    fn capture_frame(&mut self) -> Result<Option<Frame>>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}
