use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::ensure_success;
use crate::config::ServiceConfig;
use crate::error::{PipelineError, Result};

pub const DEFAULT_SCRIPT_MODEL: &str = "llama-3.2-90b-vision-preview";
/// Spoken scripts are cut to this many characters.
pub const MAX_SCRIPT_CHARS: usize = 150;

const AD_SCRIPT_INSTRUCTION: &str = "Write a spoken script of about 25 words, \
roughly five seconds long, for an in-person billboard ad built from this picture. \
Speak in the first person as the person shown in the ad. Output only the words \
to be spoken: no stage directions, no labels such as Scene or Narrator, and no \
preamble. Feature the product and the person's identity; guess the product if \
it is unclear.";

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Writes a short ad script for an image through an OpenAI-compatible vision chat API.
pub struct ScriptWriter {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_chars: usize,
}

impl ScriptWriter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: DEFAULT_SCRIPT_MODEL.to_string(),
            max_chars: MAX_SCRIPT_CHARS,
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Self::new(&config.groq_base, config.groq_key()?)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    /// Script for the JPEG (or other image) at `image_path`.
    pub fn write_script(&self, image_path: &Path) -> Result<String> {
        let bytes = std::fs::read(image_path)?;
        self.write_script_for_bytes(&bytes)
    }

    pub fn write_script_for_bytes(&self, image: &[u8]) -> Result<String> {
        let data_url = format!("data:image/jpeg;base64,{}", STANDARD.encode(image));
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": AD_SCRIPT_INSTRUCTION},
                    {"type": "image_url", "image_url": {"url": data_url}}
                ]
            })],
        };

        debug!("Requesting script from {} ({})", self.base_url, self.model);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?;

        let chat: ChatResponse = ensure_success(response)?.json()?;
        let text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PipelineError::generation_failed("chat completion had no content"))?;

        let script = truncate_chars(text.trim(), self.max_chars);
        info!("Script: {}", script);
        Ok(script)
    }
}

/// First `max` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo wörld", 7), "héllo w");
        assert_eq!(truncate_chars(&"a".repeat(400), MAX_SCRIPT_CHARS).len(), 150);
    }

    #[test]
    fn missing_key_is_a_config_error() {
        assert!(matches!(
            ScriptWriter::from_config(&ServiceConfig::default()),
            Err(PipelineError::MissingConfig(_))
        ));
    }
}
