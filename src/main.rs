use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vidmorph::capture::{CaptureSource, StillImage, VideoFileCapture, WebcamCapture};
use vidmorph::catalog::{self, CatalogLayout, CatalogSettings};
use vidmorph::config::ServiceConfig;
use vidmorph::frame::Point2;
use vidmorph::live::{self, LoopOptions};
use vidmorph::output::{FrameDirSink, OutputSink, V4L2Output};
use vidmorph::pipeline::{ObjectReplacer, ReplaceConfig, ReplaceOutcome, ReplaceStrategy};
use vidmorph::pitch::{self, PitchSettings};
use vidmorph::remote::{
    run_job, CartesiaClient, CloneOptions, LipSyncClient, LipSyncRequest, ScriptWriter,
    SpeechProvider, SystemClock, TtsRequest, WaitPolicy,
};
use vidmorph::server::{self, MediaPaths};
use vidmorph::vision::{
    DetectionParams, FaceLandmarkTracker, HttpVisionClient, InpaintSettings, Normalization,
    OnnxFaceMesh, PointLabel, ResizingFill,
};
use vidmorph::media::{self, Ffmpeg};
use vidmorph::Frame;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Live face swap from a camera or video onto a virtual camera
    Swap(SwapArgs),
    /// Replace objects named by a prompt with generated content
    Replace(ReplaceArgs),
    /// Submit a lip-sync job, wait for it and download the result
    Lipsync(LipsyncArgs),
    /// Clone a voice from an audio sample
    CloneVoice(CloneVoiceArgs),
    /// Synthesize speech to an audio file
    Tts(TtsArgs),
    /// Write a short spoken ad script for an image
    Script(ScriptArgs),
    /// Serve the lip-sync input video and audio over HTTP
    Serve(ServeArgs),
    /// Render a still image into a silent video
    StillVideo(StillVideoArgs),
    /// Lip-sync every voice clip of a catalog directory and index the results
    Catalog(CatalogArgs),
    /// Turn a photo into a clip of its subject speaking a generated ad script
    Pitch(PitchArgs),
}

/// Where frames come from.
#[derive(Args, Debug)]
struct SourceArgs {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Read frames from a video file instead of the webcam
    #[arg(long, conflicts_with = "image")]
    video: Option<PathBuf>,

    /// Use a single still image as the source
    #[arg(long)]
    image: Option<PathBuf>,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,
}

impl SourceArgs {
    fn open(&self) -> Result<Box<dyn CaptureSource>> {
        let source: Box<dyn CaptureSource> = if let Some(path) = &self.image {
            Box::new(StillImage::open(path)?)
        } else if let Some(path) = &self.video {
            Box::new(
                VideoFileCapture::open(path, self.capture_width, self.capture_height)
                    .context("Failed to open video file")?,
            )
        } else {
            Box::new(
                WebcamCapture::new(self.input_device, self.capture_width, self.capture_height)
                    .context("Failed to initialize webcam capture")?,
            )
        };
        Ok(source)
    }
}

/// Where processed frames go.
#[derive(Args, Debug)]
struct SinkArgs {
    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Write numbered PNG frames here instead of a v4l2loopback device
    #[arg(long)]
    frames_dir: Option<PathBuf>,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,
}

impl SinkArgs {
    fn open(&self) -> Result<Box<dyn OutputSink>> {
        let sink: Box<dyn OutputSink> = match &self.frames_dir {
            Some(dir) => Box::new(FrameDirSink::new(dir, self.output_width, self.output_height)?),
            None => Box::new(
                V4L2Output::new(&self.output_device, self.output_width, self.output_height)
                    .context("Failed to initialize v4l2loopback output")?,
            ),
        };
        Ok(sink)
    }
}

#[derive(Args, Debug)]
struct SwapArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[command(flatten)]
    sink: SinkArgs,

    /// Face mesh landmark model (ONNX file)
    #[arg(long, env = "FACE_MESH_MODEL")]
    model: PathBuf,

    /// Input normalisation the model was exported with
    #[arg(long, value_enum, default_value_t = Normalization::Unit)]
    normalization: Normalization,

    /// Reference face image; without it, type 'c' to capture one live
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<u64>,
}

#[derive(Args, Debug)]
struct ReplaceArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// What to find, e.g. "chair"
    #[arg(long, required_unless_present = "point")]
    target: Option<String>,

    /// What to put there instead
    #[arg(long)]
    replacement: String,

    /// Segment the object under this pixel ("x,y") instead of detecting
    #[arg(long, value_parser = parse_point)]
    point: Option<Point2>,

    /// Treat --point as background rather than foreground
    #[arg(long, requires = "point")]
    background: bool,

    /// Output image for one-shot runs
    #[arg(long, default_value = "processed_frame.png")]
    output: PathBuf,

    /// Directory for frames processed from a live source
    #[arg(long, default_value = "processed")]
    save_dir: PathBuf,

    /// Where live source frames are previewed (numbered PNGs)
    #[arg(long, default_value = "preview")]
    preview_dir: PathBuf,

    /// Vision inference service (detect/segment/inpaint)
    #[arg(long)]
    vision_url: Option<String>,

    #[arg(long, default_value_t = 0.35)]
    box_threshold: f32,

    #[arg(long, default_value_t = 0.25)]
    text_threshold: f32,

    /// Longest side passed to the models
    #[arg(long, default_value_t = 1024)]
    max_side: u32,

    #[arg(long, value_enum, default_value_t = ReplaceStrategy::Inpaint)]
    strategy: ReplaceStrategy,

    /// Mask dilation kernel in pixels (0 = off)
    #[arg(long, default_value_t = 0)]
    dilate: u8,

    /// Minimum score for the chosen segmentation mask
    #[arg(long)]
    min_mask_score: Option<f32>,

    /// Inpainting model resolution (multiple of 8)
    #[arg(long, default_value_t = 512)]
    inpaint_size: u32,

    #[arg(long, default_value_t = 30)]
    steps: u32,

    #[arg(long, default_value_t = 7.5)]
    guidance_scale: f32,

    #[arg(long)]
    negative_prompt: Option<String>,
}

#[derive(Args, Debug)]
#[command(group(clap::ArgGroup::new("speech").required(true).args(["audio_url", "script"])))]
struct LipsyncArgs {
    /// Publicly reachable URL of the input video
    #[arg(long)]
    video_url: String,

    /// Publicly reachable URL of the audio to sync to
    #[arg(long)]
    audio_url: Option<String>,

    /// Text for the service to speak instead of an audio track
    #[arg(long, requires = "voice_id")]
    script: Option<String>,

    /// Voice for --script
    #[arg(long)]
    voice_id: Option<String>,

    /// TTS provider for --script
    #[arg(long, default_value = "elevenlabs")]
    tts_provider: String,

    #[arg(long, default_value = vidmorph::remote::DEFAULT_LIPSYNC_MODEL)]
    model: String,

    #[arg(short, long, default_value = "sync_output.mp4")]
    output: PathBuf,

    /// Delay between status polls
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,

    /// Give up after this long
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,
}

#[derive(Args, Debug)]
struct CloneVoiceArgs {
    /// Audio sample of the voice
    clip: PathBuf,

    #[arg(long, default_value = "Cloned voice")]
    name: String,

    #[arg(long, default_value = "Cloned from a recorded sample")]
    description: String,

    #[arg(long, default_value = "en")]
    language: String,

    /// similarity or stability
    #[arg(long, default_value = "similarity")]
    mode: String,

    /// Skip audio enhancement of the sample
    #[arg(long)]
    no_enhance: bool,
}

#[derive(Args, Debug)]
struct TtsArgs {
    #[arg(long)]
    voice_id: String,

    /// Text to speak
    #[arg(long)]
    text: String,

    #[arg(short, long, default_value = "output.mp3")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct ScriptArgs {
    image: PathBuf,

    #[arg(long)]
    model: Option<String>,

    #[arg(long, default_value_t = vidmorph::remote::MAX_SCRIPT_CHARS)]
    max_chars: usize,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    #[arg(long, default_value = "input.mp4")]
    video: PathBuf,

    #[arg(long, default_value = "input_audio.mp3")]
    audio: PathBuf,
}

#[derive(Args, Debug)]
struct StillVideoArgs {
    image: PathBuf,

    /// Size the clip to outlast this audio file
    #[arg(long, conflicts_with = "seconds")]
    audio: Option<PathBuf>,

    #[arg(long, default_value_t = 5)]
    seconds: u32,

    #[arg(long, default_value_t = 25)]
    fps: u32,

    #[arg(short, long, default_value = "input.mp4")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct CatalogArgs {
    /// Directory holding images/ and audio/; videos/ and db.json are written here
    #[arg(long, default_value = "db")]
    root: PathBuf,

    /// Stubs to process (default: every images/*.jpg)
    stubs: Vec<String>,

    /// Public base URL under which /video and /audio are reachable
    #[arg(long, env = "PUBLIC_MEDIA_URL")]
    public_url: String,

    /// Also run the media server on this address
    #[arg(long)]
    serve: Option<SocketAddr>,

    #[arg(long, default_value_t = catalog::CATALOG_FPS)]
    fps: u32,

    /// Delay between status polls
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,

    /// Give up on a clip after this long
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,
}

#[derive(Args, Debug)]
struct PitchArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Where the captured photo is saved
    #[arg(long, default_value = "camera_input.jpg")]
    photo: PathBuf,

    /// Voice the script is spoken with
    #[arg(long)]
    voice_id: String,

    #[arg(long, default_value = "elevenlabs")]
    tts_provider: String,

    /// Public base URL under which /video is reachable
    #[arg(long, env = "PUBLIC_MEDIA_URL")]
    public_url: String,

    /// Also run the media server on this address
    #[arg(long)]
    serve: Option<SocketAddr>,

    #[arg(long, default_value_t = 5)]
    seconds: u32,

    #[arg(short, long, default_value = "sync_output.mp4")]
    output: PathBuf,
}

fn parse_point(s: &str) -> std::result::Result<Point2, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got {s:?}"))?;
    let x: f32 = x.trim().parse().map_err(|e| format!("bad x: {e}"))?;
    let y: f32 = y.trim().parse().map_err(|e| format!("bad y: {e}"))?;
    Ok(Point2::new(x, y))
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env();

    match cli.command {
        Command::Swap(args) => swap(args),
        Command::Replace(args) => replace(args, &config),
        Command::Lipsync(args) => lipsync(args, &config),
        Command::CloneVoice(args) => clone_voice(args, &config),
        Command::Tts(args) => tts(args, &config),
        Command::Script(args) => script(args, &config),
        Command::Serve(args) => serve(args),
        Command::StillVideo(args) => still_video(args),
        Command::Catalog(args) => build_catalog(args, &config),
        Command::Pitch(args) => run_pitch(args, &config),
    }
}

fn swap(args: SwapArgs) -> Result<()> {
    tracing::info!(
        "Capture: {}x{}, output: {}x{}, target FPS: {}",
        args.source.capture_width,
        args.source.capture_height,
        args.sink.output_width,
        args.sink.output_height,
        args.source.fps
    );

    let mut capture = args.source.open()?;
    let mut output = args.sink.open()?;

    let model = OnnxFaceMesh::new(&args.model)
        .context("Failed to load face mesh model")?
        .with_normalization(args.normalization);
    let mut tracker = FaceLandmarkTracker::new(model);

    let reference = match &args.reference {
        Some(path) => Some(load_frame(path)?),
        None => None,
    };

    let keys = live::spawn_stdin_keys();
    let stats = live::run_face_swap(
        &mut *capture,
        &mut *output,
        &mut tracker,
        reference,
        &keys,
        LoopOptions {
            fps: args.source.fps,
            max_frames: args.max_frames,
        },
    )?;

    tracing::info!(
        "Done: {} frames, {} swapped, {} degraded",
        stats.frames,
        stats.swapped,
        stats.degraded
    );
    Ok(())
}

fn replace(args: ReplaceArgs, config: &ServiceConfig) -> Result<()> {
    let base = args.vision_url.clone().unwrap_or_else(|| config.vision_base.clone());
    let settings = InpaintSettings {
        native_size: args.inpaint_size,
        steps: args.steps,
        guidance_scale: args.guidance_scale,
        negative_prompt: args.negative_prompt.clone(),
    };

    let detector = HttpVisionClient::new(&base)?;
    let segmenter = HttpVisionClient::new(&base)?;
    let fill = ResizingFill::new(HttpVisionClient::new(&base)?.with_inpaint_settings(settings))?;

    let replace_config = ReplaceConfig {
        max_side: args.max_side,
        detection: DetectionParams::new(args.box_threshold, args.text_threshold),
        strategy: args.strategy,
        dilation: args.dilate,
        min_mask_score: args.min_mask_score,
    };
    let mut replacer = ObjectReplacer::new(detector, segmenter, fill, replace_config);

    // A still image is processed once; live sources wait for 'c'
    if let Some(path) = &args.source.image {
        let frame = load_frame(path)?;
        let outcome = match (args.point, &args.target) {
            (Some(point), _) => {
                let label = if args.background {
                    PointLabel::Background
                } else {
                    PointLabel::Foreground
                };
                replacer.replace_at_point(&frame, point, label, &args.replacement)
            }
            (None, Some(target)) => replacer.replace(&frame, target, &args.replacement),
            (None, None) => bail!("either --target or --point is required"),
        };

        match &outcome {
            ReplaceOutcome::Replaced { regions, .. } => {
                tracing::info!("Replaced {} region(s)", regions.len())
            }
            ReplaceOutcome::NoDetection { .. } => {
                tracing::info!("No objects detected with the given prompt")
            }
            ReplaceOutcome::Degraded { reason, .. } => {
                tracing::warn!("Returning the input unchanged: {}", reason)
            }
        }
        outcome
            .frame()
            .save(&args.output)
            .with_context(|| format!("Failed to save {}", args.output.display()))?;
        tracing::info!("Saved {}", args.output.display());
        return Ok(());
    }

    let Some(target) = args.target.as_deref() else {
        bail!("live sources need --target");
    };
    let mut capture = args.source.open()?;
    let (width, height) = capture.resolution();
    let mut preview = FrameDirSink::new(&args.preview_dir, width, height)?;
    let keys = live::spawn_stdin_keys();

    let saved = live::run_capture_and_replace(
        &mut *capture,
        &mut preview,
        &mut replacer,
        target,
        &args.replacement,
        &keys,
        &args.save_dir,
        LoopOptions {
            fps: args.source.fps,
            max_frames: None,
        },
    )?;
    tracing::info!("Processed {} frame(s)", saved.len());
    Ok(())
}

fn lipsync(args: LipsyncArgs, config: &ServiceConfig) -> Result<()> {
    let client = LipSyncClient::from_config(config)?;

    let request = match (&args.audio_url, &args.script) {
        (Some(audio_url), _) => LipSyncRequest::with_audio(&args.video_url, audio_url),
        (None, Some(script)) => {
            let Some(voice_id) = args.voice_id.clone() else {
                bail!("--script needs --voice-id");
            };
            LipSyncRequest::with_script(
                &args.video_url,
                SpeechProvider {
                    name: args.tts_provider.clone(),
                    voice_id,
                    script: script.clone(),
                },
            )
        }
        (None, None) => bail!("either --audio-url or --script is required"),
    }
    .model(&args.model);

    let policy = WaitPolicy::new(
        Duration::from_millis(args.interval_ms),
        Duration::from_secs(args.timeout_secs),
    );
    let done = run_job(&client, &request, &policy, &SystemClock::new(), &args.output)?;
    tracing::info!(
        "Job {} finished: {} bytes written to {}",
        done.job_id,
        done.bytes,
        done.path.display()
    );
    Ok(())
}

fn clone_voice(args: CloneVoiceArgs, config: &ServiceConfig) -> Result<()> {
    let client = CartesiaClient::from_config(config)?;
    let options = CloneOptions {
        name: args.name,
        description: args.description,
        language: args.language,
        mode: args.mode,
        enhance: !args.no_enhance,
    };
    let voice = client
        .clone_voice(&args.clip, &options)
        .with_context(|| format!("Failed to clone voice from {}", args.clip.display()))?;
    println!("{}", voice.id);
    Ok(())
}

fn tts(args: TtsArgs, config: &ServiceConfig) -> Result<()> {
    let client = CartesiaClient::from_config(config)?;
    client.tts(&TtsRequest::new(args.voice_id, args.text), &args.output)?;
    Ok(())
}

fn script(args: ScriptArgs, config: &ServiceConfig) -> Result<()> {
    let mut writer = ScriptWriter::from_config(config)?.with_max_chars(args.max_chars);
    if let Some(model) = args.model {
        writer = writer.with_model(model);
    }
    let text = writer.write_script(&args.image)?;
    println!("{text}");
    Ok(())
}

fn serve(args: ServeArgs) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime
        .block_on(server::serve(
            args.addr,
            MediaPaths {
                video: args.video,
                audio: args.audio,
            },
        ))
        .context("Media server stopped")?;
    Ok(())
}

fn still_video(args: StillVideoArgs) -> Result<()> {
    let seconds = match &args.audio {
        Some(audio) => {
            let duration = media::media_duration(audio)?;
            let seconds = media::clip_length_secs(duration, args.fps);
            tracing::info!("Audio is {:.2}s, rendering {}s of video", duration, seconds);
            seconds
        }
        None => args.seconds,
    };
    media::render_still_video(&args.image, seconds, args.fps, &args.output)?;
    Ok(())
}

/// Run the media server on a background thread for the rest of the process.
fn spawn_media_server(addr: SocketAddr, paths: MediaPaths) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("Failed to start tokio runtime: {}", e);
                return;
            }
        };
        if let Err(e) = runtime.block_on(server::serve(addr, paths)) {
            tracing::error!("Media server stopped: {}", e);
        }
    });
}

fn build_catalog(args: CatalogArgs, config: &ServiceConfig) -> Result<()> {
    let client = LipSyncClient::from_config(config)?;
    let mut settings = CatalogSettings::new(CatalogLayout::under(&args.root), args.public_url);
    settings.fps = args.fps;
    settings.policy = WaitPolicy::new(
        Duration::from_millis(args.interval_ms),
        Duration::from_secs(args.timeout_secs),
    );
    if let Some(addr) = args.serve {
        spawn_media_server(addr, settings.staging.clone());
    }

    let stubs = if args.stubs.is_empty() {
        settings
            .layout
            .discover_stubs()
            .with_context(|| format!("Failed to list {}", settings.layout.images.display()))?
    } else {
        args.stubs
    };
    tracing::info!("Building catalog for {} stub(s)", stubs.len());

    let catalog = catalog::build_catalog(&Ffmpeg, &client, &SystemClock::new(), &settings, &stubs)?;
    let clips: usize = catalog.values().map(|entry| entry.video_paths.len()).sum();
    tracing::info!(
        "Catalog done: {} stub(s), {} clip(s), index at {}",
        catalog.len(),
        clips,
        settings.layout.index.display()
    );
    Ok(())
}

fn run_pitch(args: PitchArgs, config: &ServiceConfig) -> Result<()> {
    let writer = ScriptWriter::from_config(config)?;
    let client = LipSyncClient::from_config(config)?;

    let image = match &args.source.image {
        Some(path) => path.clone(),
        None => {
            let mut capture = args.source.open()?;
            if args.source.video.is_none() {
                println!("Press Enter to take a picture...");
                let mut line = String::new();
                std::io::stdin().read_line(&mut line)?;
            }
            let Some(frame) = capture.capture_frame()? else {
                bail!("source produced no frame");
            };
            frame
                .save(&args.photo)
                .with_context(|| format!("Failed to save {}", args.photo.display()))?;
            tracing::info!("Photo saved to {}", args.photo.display());
            args.photo.clone()
        }
    };

    let mut settings = PitchSettings::new(args.public_url, args.voice_id);
    settings.provider = args.tts_provider;
    settings.seconds = args.seconds;
    settings.output = args.output;
    if let Some(addr) = args.serve {
        spawn_media_server(
            addr,
            MediaPaths {
                video: settings.staged_video.clone(),
                ..MediaPaths::default()
            },
        );
    }

    let outcome = pitch::pitch(&Ffmpeg, &writer, &client, &SystemClock::new(), &image, &settings)?;
    println!("{}", outcome.script);
    tracing::info!(
        "Job {} finished: {} bytes written to {}",
        outcome.job.job_id,
        outcome.job.bytes,
        outcome.job.path.display()
    );
    Ok(())
}

fn load_frame(path: &Path) -> Result<Frame> {
    Ok(image::open(path)
        .with_context(|| format!("Failed to open image {}", path.display()))?
        .to_rgb8())
}
