use super::CaptureSource;
use anyhow::{anyhow, bail, Context, Result};
use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use ffmpeg_sidecar::iter::FfmpegIterator;
use std::path::Path;

use crate::frame::Frame;

/// Decodes a video file through ffmpeg as RGB24 rawvideo.
///
/// ffmpeg scales every frame to the requested size.
pub struct VideoFileCapture {
    child: FfmpegChild,
    events: FfmpegIterator,
    width: u32,
    height: u32,
}

/// The ffmpeg invocation that decodes `path` to `width`x`height` RGB24 on stdout.
pub(crate) fn decode_command(path: &Path, width: u32, height: u32) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new();
    cmd.input(path.to_string_lossy().as_ref());
    cmd.args(["-vf", &format!("scale={width}:{height}")]);
    cmd.rawvideo();
    cmd
}

impl VideoFileCapture {
    pub fn open<P: AsRef<Path>>(path: P, width: u32, height: u32) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("Video file not found: {}", path.display());
        }

        tracing::info!("Opening video {} at {}x{}", path.display(), width, height);

        let mut child = decode_command(path, width, height)
            .spawn()
            .context("Failed to spawn ffmpeg (is it on PATH?)")?;
        let events = child
            .iter()
            .map_err(|e| anyhow!("Failed to read ffmpeg events: {e}"))?;

        Ok(Self {
            child,
            events,
            width,
            height,
        })
    }
}

impl CaptureSource for VideoFileCapture {
    fn capture_frame(&mut self) -> Result<Option<Frame>> {
        for event in self.events.by_ref() {
            match event {
                FfmpegEvent::OutputFrame(frame) => {
                    let decoded = Frame::from_raw(frame.width, frame.height, frame.data)
                        .context("Decoded frame has unexpected size")?;
                    return Ok(Some(decoded));
                }
                FfmpegEvent::Log(LogLevel::Fatal, message) => bail!("ffmpeg: {message}"),
                FfmpegEvent::Error(message) => tracing::warn!("ffmpeg: {}", message),
                FfmpegEvent::Done => break,
                _ => {}
            }
        }

        tracing::info!("End of video stream");
        Ok(None)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for VideoFileCapture {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
