use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;
use tracing::debug;

use super::job::StatusSnapshot;
use super::poll::JobApi;
use super::{download_to, ensure_success};
use crate::config::ServiceConfig;
use crate::error::{PipelineError, Result};

pub const DEFAULT_LIPSYNC_MODEL: &str = "lipsync-1.9.0-beta";

/// Text-to-speech voice the lip-sync service should render a script with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechProvider {
    pub name: String,
    pub voice_id: String,
    pub script: String,
}

/// One typed input of a lip-sync job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LipSyncInput {
    Video { url: String },
    Audio { url: String },
    Text { provider: SpeechProvider },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LipSyncRequest {
    pub model: String,
    pub input: Vec<LipSyncInput>,
}

impl LipSyncRequest {
    /// Re-render `video_url` so the mouth follows `audio_url`.
    pub fn with_audio(video_url: impl Into<String>, audio_url: impl Into<String>) -> Self {
        Self {
            model: DEFAULT_LIPSYNC_MODEL.to_string(),
            input: vec![
                LipSyncInput::Video {
                    url: video_url.into(),
                },
                LipSyncInput::Audio {
                    url: audio_url.into(),
                },
            ],
        }
    }

    /// Re-render `video_url` speaking a script voiced by the service's TTS.
    pub fn with_script(video_url: impl Into<String>, provider: SpeechProvider) -> Self {
        Self {
            model: DEFAULT_LIPSYNC_MODEL.to_string(),
            input: vec![
                LipSyncInput::Video {
                    url: video_url.into(),
                },
                LipSyncInput::Text { provider },
            ],
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Client for a sync.so v2 compatible lip-sync service.
pub struct LipSyncClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl LipSyncClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Fails with `MissingConfig` when `SYNC_API_KEY` is not set.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Self::new(&config.sync_base, config.sync_key()?)
    }

    fn generate_url(&self) -> String {
        format!("{}/v2/generate", self.base_url)
    }
}

impl JobApi for LipSyncClient {
    type Request = LipSyncRequest;

    fn submit(&self, request: &LipSyncRequest) -> Result<StatusSnapshot> {
        debug!("Submitting lip-sync job with model {}", request.model);
        let response = self
            .http
            .post(self.generate_url())
            .header("x-api-key", &self.api_key)
            .json(request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::RemoteSubmission {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        StatusSnapshot::from_json(response.json()?)
    }

    fn poll(&self, job_id: &str) -> Result<StatusSnapshot> {
        let response = self
            .http
            .get(format!("{}/{}", self.generate_url(), job_id))
            .header("x-api-key", &self.api_key)
            .send()?;
        StatusSnapshot::from_json(ensure_success(response)?.json()?)
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        download_to(&self.http, url, dest)
    }
}
