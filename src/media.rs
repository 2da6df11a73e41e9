//! ffmpeg / ffprobe helpers for the lip-sync inputs.

use std::path::Path;

use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Whole seconds of silent video needed to carry `duration` seconds of audio.
///
/// Rounds the audio up to whole frames, then adds a second of padding so the
/// video always outlasts the audio.
pub fn clip_length_secs(duration: f64, fps: u32) -> u32 {
    if fps == 0 || !duration.is_finite() || duration <= 0.0 {
        return 1;
    }
    let frames = (duration * fps as f64).ceil() as u64;
    (frames / fps as u64) as u32 + 1
}

/// Media operations the lip-sync flows need from the outside world.
pub trait MediaTools {
    fn media_duration(&self, path: &Path) -> Result<f64>;

    fn render_still_video(&self, image: &Path, seconds: u32, fps: u32, output: &Path)
        -> Result<()>;
}

/// [`MediaTools`] backed by the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ffmpeg;

impl MediaTools for Ffmpeg {
    fn media_duration(&self, path: &Path) -> Result<f64> {
        media_duration(path)
    }

    fn render_still_video(
        &self,
        image: &Path,
        seconds: u32,
        fps: u32,
        output: &Path,
    ) -> Result<()> {
        render_still_video(image, seconds, fps, output)
    }
}

fn still_video_command(image: &Path, seconds: u32, fps: u32, output: &Path) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new();
    cmd.overwrite();
    cmd.args(["-loop", "1"]);
    cmd.input(image.to_string_lossy().as_ref());
    cmd.args([
        "-t",
        &seconds.to_string(),
        "-r",
        &fps.to_string(),
        "-c:v",
        "libx264",
        "-pix_fmt",
        "yuv420p",
        // libx264 needs even dimensions
        "-vf",
        "scale=trunc(iw/2)*2:trunc(ih/2)*2",
        "-an",
    ]);
    cmd.output(output.to_string_lossy().as_ref());
    cmd
}

/// Render a silent H.264 video that shows `image` for `seconds`.
pub fn render_still_video(image: &Path, seconds: u32, fps: u32, output: &Path) -> Result<()> {
    if !image.exists() {
        return Err(PipelineError::MediaTool(format!(
            "image not found: {}",
            image.display()
        )));
    }
    let mut cmd = still_video_command(image, seconds, fps, output);
    debug!("Running {:?}", cmd);

    let mut child = cmd
        .spawn()
        .map_err(|e| PipelineError::MediaTool(format!("Failed to execute ffmpeg: {e}")))?;

    let mut errors = Vec::new();
    let events = child
        .iter()
        .map_err(|e| PipelineError::MediaTool(format!("ffmpeg events: {e}")))?;
    for event in events {
        match event {
            FfmpegEvent::Error(message) | FfmpegEvent::Log(LogLevel::Fatal, message) => {
                errors.push(message)
            }
            FfmpegEvent::Log(LogLevel::Error, message) => errors.push(message),
            _ => {}
        }
    }

    let status = child
        .wait()
        .map_err(|e| PipelineError::MediaTool(format!("Failed to wait for ffmpeg: {e}")))?;
    if !status.success() {
        return Err(PipelineError::MediaTool(format!(
            "ffmpeg exited with {}: {}",
            status,
            errors.join("; ")
        )));
    }
    info!(
        "Rendered {}s @ {}fps still video to {}",
        seconds,
        fps,
        output.display()
    );
    Ok(())
}

/// Container duration in seconds, as reported by ffprobe.
pub fn media_duration(path: &Path) -> Result<f64> {
    debug!("Running ffprobe for duration on {}", path.display());
    let metadata = ffprobe::ffprobe(path).map_err(|e| {
        PipelineError::MediaTool(format!("ffprobe failed for {}: {e}", path.display()))
    })?;
    parse_duration(metadata.format.duration.as_deref())
}

fn parse_duration(reported: Option<&str>) -> Result<f64> {
    let text = reported.unwrap_or_default().trim();
    text.parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| PipelineError::MediaTool(format!("unparseable duration {text:?}")))
}
