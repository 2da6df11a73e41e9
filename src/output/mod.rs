mod frame_dir;
mod loopback;

pub use frame_dir::FrameDirSink;
pub use loopback::V4L2Output;

use anyhow::Result;

use crate::frame::Frame;

/// Trait for output destinations
pub trait OutputSink {
    /// Write a frame to the output
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);
}
