//! Interactive capture loops driven by single-letter commands on stdin.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::capture::CaptureSource;
use crate::frame::Frame;
use crate::output::OutputSink;
use crate::pipeline::{ObjectReplacer, ReplaceOutcome};
use crate::vision::{Detector, FaceLandmarkTracker, GenerativeFill, LandmarkModel, Segmenter, SwapOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    /// `c`: capture the current frame (reference face, or frame to process)
    Capture,
    /// `q`
    Quit,
    /// `r`: forget the reference landmarks
    Recapture,
}

impl KeyCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "c" => Some(KeyCommand::Capture),
            "q" => Some(KeyCommand::Quit),
            "r" => Some(KeyCommand::Recapture),
            _ => None,
        }
    }
}

/// Read commands from stdin on a helper thread so the capture loop never blocks.
///
/// The channel disconnects when stdin closes.
pub fn spawn_stdin_keys() -> Receiver<KeyCommand> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match KeyCommand::parse(&line) {
                Some(cmd) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                None => warn!("Unknown command {:?} (c = capture, r = recapture, q = quit)", line),
            }
        }
    });
    rx
}

/// Pending commands, oldest first. A closed channel yields nothing.
fn drain(keys: &Receiver<KeyCommand>) -> Vec<KeyCommand> {
    let mut commands = Vec::new();
    loop {
        match keys.try_recv() {
            Ok(cmd) => commands.push(cmd),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
    commands
}

/// Consecutive capture failures after which a live loop gives up.
pub const MAX_CONSECUTIVE_CAPTURE_ERRORS: u32 = 30;

/// Sleep out the rest of the frame slot started at `loop_start`.
fn pace(loop_start: Instant, frame_duration: Option<Duration>) {
    if let Some(frame_duration) = frame_duration {
        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }
}

/// Tracks capture failures in a row; a success resets the count.
#[derive(Debug, Default)]
struct FailureStreak(u32);

impl FailureStreak {
    fn record(&mut self, error: anyhow::Error) -> Result<()> {
        self.0 += 1;
        if self.0 >= MAX_CONSECUTIVE_CAPTURE_ERRORS {
            return Err(error.context(format!("capture failed {} times in a row", self.0)));
        }
        warn!("Capture failed: {:#}", error);
        Ok(())
    }

    fn reset(&mut self) {
        self.0 = 0;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    /// Target frame rate; 0 runs unthrottled.
    pub fps: u32,
    /// Stop after this many loop iterations, failed captures included.
    pub max_frames: Option<u64>,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            fps: 30,
            max_frames: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub swapped: u64,
    pub degraded: u64,
    pub capture_errors: u64,
}

/// Live face swap: every frame from `capture` gets the reference face pasted on.
///
/// Until a reference exists, frames pass through untouched; `c` takes the
/// current frame as the reference. Per-frame failures are logged and skipped.
pub fn run_face_swap<C, O, M>(
    capture: &mut C,
    output: &mut O,
    tracker: &mut FaceLandmarkTracker<M>,
    mut reference: Option<Frame>,
    keys: &Receiver<KeyCommand>,
    options: LoopOptions,
) -> Result<LoopStats>
where
    C: CaptureSource + ?Sized,
    O: OutputSink + ?Sized,
    M: LandmarkModel,
{
    let frame_duration = (options.fps > 0).then(|| Duration::from_secs_f32(1.0 / options.fps as f32));
    let mut stats = LoopStats::default();
    let mut total_swap_time = Duration::ZERO;

    if reference.is_none() {
        info!("No reference yet: type 'c' + Enter to capture one");
    }
    info!("Starting face swap loop ('r' recapture, 'q' quit)");

    let mut failures = FailureStreak::default();
    let mut iterations = 0u64;

    loop {
        let loop_start = Instant::now();
        iterations += 1;

        let captured = match capture.capture_frame() {
            Ok(Some(frame)) => {
                failures.reset();
                Some(frame)
            }
            Ok(None) => {
                info!("Source exhausted");
                break;
            }
            Err(e) => {
                stats.capture_errors += 1;
                failures.record(e)?;
                None
            }
        };

        let mut quit = false;
        for cmd in drain(keys) {
            match cmd {
                KeyCommand::Capture => match &captured {
                    Some(frame) => {
                        info!("Reference frame captured");
                        reference = Some(frame.clone());
                        tracker.reset_reference();
                    }
                    None => warn!("No frame to capture"),
                },
                KeyCommand::Recapture => tracker.reset_reference(),
                KeyCommand::Quit => quit = true,
            }
        }
        if quit {
            info!("Quitting");
            break;
        }

        if let Some(frame) = captured {
            let swap_start = Instant::now();
            let output_frame = match &reference {
                Some(reference) => match tracker.swap(reference, frame) {
                    SwapOutcome::Swapped(frame) => {
                        stats.swapped += 1;
                        frame
                    }
                    SwapOutcome::Degraded { frame, reason } => {
                        debug!("Swap skipped: {:?}", reason);
                        stats.degraded += 1;
                        frame
                    }
                },
                None => frame,
            };
            total_swap_time += swap_start.elapsed();

            if let Err(e) = output.write_frame(&output_frame) {
                warn!("Output failed: {:#}", e);
            }
            stats.frames += 1;

            if stats.frames % 30 == 0 {
                info!(
                    "Frame {}: swap={:.1}ms avg, swapped={}, degraded={}",
                    stats.frames,
                    total_swap_time.as_secs_f64() * 1000.0 / stats.frames as f64,
                    stats.swapped,
                    stats.degraded
                );
            }
        }

        if options.max_frames.is_some_and(|max| iterations >= max) {
            break;
        }

        pace(loop_start, frame_duration);
    }

    Ok(stats)
}

/// Play a source and run object replacement on each frame captured with `c`.
///
/// Processed frames are saved as numbered PNGs in `save_dir`; their paths are
/// returned.
#[allow(clippy::too_many_arguments)]
pub fn run_capture_and_replace<C, O, D, S, G>(
    capture: &mut C,
    preview: &mut O,
    replacer: &mut ObjectReplacer<D, S, G>,
    target: &str,
    replacement: &str,
    keys: &Receiver<KeyCommand>,
    save_dir: &std::path::Path,
    options: LoopOptions,
) -> Result<Vec<PathBuf>>
where
    C: CaptureSource + ?Sized,
    O: OutputSink + ?Sized,
    D: Detector,
    S: Segmenter,
    G: GenerativeFill,
{
    std::fs::create_dir_all(save_dir)
        .with_context(|| format!("Failed to create {}", save_dir.display()))?;
    let frame_duration = (options.fps > 0).then(|| Duration::from_secs_f32(1.0 / options.fps as f32));
    let mut saved = Vec::new();
    let mut iterations = 0u64;
    let mut failures = FailureStreak::default();

    info!("Type 'c' + Enter to process the current frame, 'q' to quit");

    loop {
        let loop_start = Instant::now();
        iterations += 1;

        let captured = match capture.capture_frame() {
            Ok(Some(frame)) => {
                failures.reset();
                if let Err(e) = preview.write_frame(&frame) {
                    warn!("Preview failed: {:#}", e);
                }
                Some(frame)
            }
            Ok(None) => {
                info!("End of video stream");
                break;
            }
            Err(e) => {
                failures.record(e)?;
                None
            }
        };

        let mut quit = false;
        for cmd in drain(keys) {
            match cmd {
                KeyCommand::Capture => {
                    let Some(frame) = &captured else {
                        warn!("No frame to process");
                        continue;
                    };
                    info!("Processing captured frame");
                    let outcome = replacer.replace(frame, target, replacement);
                    match &outcome {
                        ReplaceOutcome::NoDetection { .. } => {
                            info!("No objects detected with the given prompt")
                        }
                        // Broken backend or config: nothing worth saving
                        ReplaceOutcome::Degraded { reason, .. } if !reason.is_stage_failure() => {
                            error!("Replacement failed: {}", reason);
                            continue;
                        }
                        _ => {}
                    }
                    let path = save_dir.join(format!("processed_{:03}.png", saved.len() + 1));
                    match outcome.frame().save(&path) {
                        Ok(()) => {
                            info!("Processed frame saved as {}", path.display());
                            saved.push(path);
                        }
                        Err(e) => warn!("Failed to save {}: {}", path.display(), e),
                    }
                }
                KeyCommand::Quit => quit = true,
                KeyCommand::Recapture => debug!("'r' has no effect here"),
            }
        }
        if quit {
            info!("Quitting");
            break;
        }

        if options.max_frames.is_some_and(|max| iterations >= max) {
            break;
        }

        pace(loop_start, frame_duration);
    }

    Ok(saved)
}
