use std::path::Path;
use std::time::Duration;

use reqwest::blocking::multipart::Form;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ensure_success;
use crate::config::ServiceConfig;
use crate::error::Result;

const CLONE_API_VERSION: &str = "2024-06-10";
const TTS_API_VERSION: &str = "2024-11-13";

/// Descriptive fields sent alongside the voice sample.
#[derive(Debug, Clone, PartialEq)]
pub struct CloneOptions {
    pub name: String,
    pub description: String,
    pub language: String,
    /// `similarity` or `stability`
    pub mode: String,
    pub enhance: bool,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            name: "Cloned voice".to_string(),
            description: "Cloned from a recorded sample".to_string(),
            language: "en".to_string(),
            mode: "similarity".to_string(),
            enhance: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClonedVoice {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputFormat {
    pub container: String,
    pub bit_rate: u32,
    pub sample_rate: u32,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            container: "mp3".to_string(),
            bit_rate: 192_000,
            sample_rate: 44_100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TtsRequest {
    pub model_id: String,
    pub transcript: String,
    pub language: String,
    pub voice: VoiceRef,
    pub output_format: OutputFormat,
}

impl TtsRequest {
    /// `sonic-2`, English, 192 kbit/s 44.1 kHz MP3.
    pub fn new(voice_id: impl Into<String>, transcript: impl Into<String>) -> Self {
        Self {
            model_id: "sonic-2".to_string(),
            transcript: transcript.into(),
            language: "en".to_string(),
            voice: VoiceRef { id: voice_id.into() },
            output_format: OutputFormat::default(),
        }
    }
}

/// Client for Cartesia-compatible voice cloning and speech synthesis.
pub struct CartesiaClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl CartesiaClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Self::new(&config.cartesia_base, config.cartesia_key()?)
    }

    /// Upload an audio sample and get back a voice usable for [`Self::tts`].
    pub fn clone_voice(&self, clip: &Path, options: &CloneOptions) -> Result<ClonedVoice> {
        let form = Form::new()
            .text("name", options.name.clone())
            .text("description", options.description.clone())
            .text("language", options.language.clone())
            .text("mode", options.mode.clone())
            .text("enhance", options.enhance.to_string())
            .file("clip", clip)?;

        info!("Cloning voice from {}", clip.display());
        let response = self
            .http
            .post(format!("{}/voices/clone", self.base_url))
            .header("X-API-Key", &self.api_key)
            .header("Cartesia-Version", CLONE_API_VERSION)
            .multipart(form)
            .send()?;

        let voice: ClonedVoice = ensure_success(response)?.json()?;
        info!("Cloned voice {}", voice.id);
        Ok(voice)
    }

    /// Synthesize speech and write the raw audio bytes to `dest`.
    pub fn tts(&self, request: &TtsRequest, dest: &Path) -> Result<u64> {
        let response = self
            .http
            .post(format!("{}/tts/bytes", self.base_url))
            .header("X-API-Key", &self.api_key)
            .header("Cartesia-Version", TTS_API_VERSION)
            .json(request)
            .send()?;

        let bytes = ensure_success(response)?.bytes()?;
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, &bytes)?;
        info!(
            "Wrote {} bytes of {} audio to {}",
            bytes.len(),
            request.output_format.container,
            dest.display()
        );
        Ok(bytes.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tts_defaults_match_wire_contract() {
        let request = TtsRequest::new("voice-1", "hello there");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model_id": "sonic-2",
                "transcript": "hello there",
                "language": "en",
                "voice": {"id": "voice-1"},
                "output_format": {"container": "mp3", "bit_rate": 192000, "sample_rate": 44100}
            })
        );
    }

    #[test]
    fn clone_response_tolerates_extra_fields() {
        let voice: ClonedVoice =
            serde_json::from_value(json!({"id": "v-9", "name": "me", "is_public": false})).unwrap();
        assert_eq!(voice.id, "v-9");
        assert_eq!(voice.name.as_deref(), Some("me"));
    }
}
