//! One-shot spoken pitch: a photo becomes a short clip of its subject reading
//! an ad script written for that photo.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::media::MediaTools;
use crate::remote::{
    run_job, Clock, CompletedJob, JobApi, LipSyncRequest, ScriptWriter, SpeechProvider, WaitPolicy,
};

#[derive(Debug, Clone)]
pub struct PitchSettings {
    /// Still video handed to the lip-sync service through the media server.
    pub staged_video: PathBuf,
    /// Public base URL of the media server.
    pub public_base: String,
    pub seconds: u32,
    pub fps: u32,
    pub provider: String,
    pub voice_id: String,
    pub policy: WaitPolicy,
    pub output: PathBuf,
}

impl PitchSettings {
    pub fn new(public_base: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            staged_video: PathBuf::from("input.mp4"),
            public_base: public_base.into(),
            seconds: 5,
            fps: 25,
            provider: "elevenlabs".to_string(),
            voice_id: voice_id.into(),
            policy: WaitPolicy::default(),
            output: PathBuf::from("sync_output.mp4"),
        }
    }

    pub fn video_url(&self) -> String {
        format!("{}/video", self.public_base.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PitchOutcome {
    pub script: String,
    pub job: CompletedJob,
}

/// Render the photo as a still video, write a script for it and have the
/// lip-sync service speak it.
pub fn pitch<T, A, C>(
    tools: &T,
    writer: &ScriptWriter,
    api: &A,
    clock: &C,
    image: &Path,
    settings: &PitchSettings,
) -> Result<PitchOutcome>
where
    T: MediaTools + ?Sized,
    A: JobApi<Request = LipSyncRequest> + ?Sized,
    C: Clock + ?Sized,
{
    let _span = tracing::info_span!("pitch").entered();
    tools.render_still_video(image, settings.seconds, settings.fps, &settings.staged_video)?;

    let script = writer.write_script(image)?;

    let request = LipSyncRequest::with_script(
        settings.video_url(),
        SpeechProvider {
            name: settings.provider.clone(),
            voice_id: settings.voice_id.clone(),
            script: script.clone(),
        },
    );
    let job = run_job(api, &request, &settings.policy, clock, &settings.output)?;
    info!("Pitch saved to {}", job.path.display());
    Ok(PitchOutcome { script, job })
}
