//! Detector, segmenter and inpainting backends served over HTTP.
//!
//! Images travel as base64-encoded PNG in JSON bodies. Every non-2xx answer or
//! unreadable body is reported as the failing stage's own error variant.

use std::io::Cursor;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::types::{
    Detection, DetectionParams, Detector, InpaintModel, ScoredMask, SegmentPrompt, Segmenter,
};
use crate::error::{PipelineError, Result};
use crate::frame::{BoundingBox, Frame, Mask};

/// Settings forwarded to the `/inpaint` endpoint.
#[derive(Debug, Clone)]
pub struct InpaintSettings {
    /// Square side the diffusion model runs at.
    pub native_size: u32,
    pub steps: u32,
    pub guidance_scale: f32,
    pub negative_prompt: Option<String>,
}

impl Default for InpaintSettings {
    fn default() -> Self {
        Self {
            native_size: 512,
            steps: 30,
            guidance_scale: 7.5,
            negative_prompt: None,
        }
    }
}

/// Client for a self-hosted vision inference service.
pub struct HttpVisionClient {
    http: Client,
    base_url: String,
    inpaint: InpaintSettings,
}

#[derive(Debug, Serialize)]
struct DetectRequest<'a> {
    image: String,
    prompt: &'a str,
    box_threshold: f32,
    text_threshold: f32,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    #[serde(rename = "box")]
    bbox: [f32; 4],
    score: f32,
    #[serde(default)]
    phrase: String,
}

#[derive(Debug, Serialize)]
struct SegmentRequest {
    image: String,
    #[serde(rename = "box", skip_serializing_if = "Option::is_none")]
    bbox: Option<[f32; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    point: Option<[f32; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<u8>,
    multimask: bool,
}

#[derive(Debug, Deserialize)]
struct SegmentResponse {
    #[serde(default)]
    masks: Vec<WireMask>,
}

#[derive(Debug, Deserialize)]
struct WireMask {
    mask: String,
    score: f32,
}

#[derive(Debug, Serialize)]
struct InpaintRequest<'a> {
    image: String,
    mask: String,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    steps: u32,
    guidance_scale: f32,
}

#[derive(Debug, Deserialize)]
struct InpaintResponse {
    image: String,
}

impl HttpVisionClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        // Diffusion calls can take minutes on a cold GPU
        let http = Client::builder().timeout(Duration::from_secs(600)).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("Vision service at {}", base_url);
        Ok(Self {
            http,
            base_url,
            inpaint: InpaintSettings::default(),
        })
    }

    pub fn with_inpaint_settings(mut self, settings: InpaintSettings) -> Self {
        self.inpaint = settings;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post<B: Serialize>(&self, path: &str, body: &B) -> std::result::Result<Response, String> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| format!("{url}: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(format!("{url} returned {status}: {body}"));
        }
        Ok(response)
    }
}

impl Detector for HttpVisionClient {
    fn detect(
        &mut self,
        frame: &Frame,
        prompt: &str,
        params: &DetectionParams,
    ) -> Result<Vec<Detection>> {
        let _span = tracing::debug_span!("detect").entered();
        let request = DetectRequest {
            image: encode_png(&DynamicImage::ImageRgb8(frame.clone()))?,
            prompt,
            box_threshold: params.box_threshold,
            text_threshold: params.text_threshold,
        };
        let response: DetectResponse = self
            .post("/detect", &request)
            .and_then(|r| r.json().map_err(|e| format!("bad /detect body: {e}")))
            .map_err(PipelineError::ModelUnavailable)?;

        let detections: Vec<Detection> = response
            .detections
            .into_iter()
            .filter(|d| d.score >= params.box_threshold)
            .map(|d| Detection {
                bbox: BoundingBox::new(d.bbox[0], d.bbox[1], d.bbox[2], d.bbox[3]),
                confidence: d.score,
                phrase: d.phrase,
            })
            .collect();
        debug!("{} detections for {:?}", detections.len(), prompt);
        Ok(detections)
    }
}

impl Segmenter for HttpVisionClient {
    fn segment(&mut self, frame: &Frame, prompt: &SegmentPrompt) -> Result<Vec<ScoredMask>> {
        let _span = tracing::debug_span!("segment").entered();
        let image = encode_png(&DynamicImage::ImageRgb8(frame.clone()))?;
        let request = match *prompt {
            SegmentPrompt::Box(b) => SegmentRequest {
                image,
                bbox: Some([b.x1, b.y1, b.x2, b.y2]),
                point: None,
                label: None,
                multimask: true,
            },
            SegmentPrompt::Point { point, label } => SegmentRequest {
                image,
                bbox: None,
                point: Some([point.x, point.y]),
                label: Some(label.as_int()),
                multimask: true,
            },
        };

        let response: SegmentResponse = self
            .post("/segment", &request)
            .and_then(|r| r.json().map_err(|e| format!("bad /segment body: {e}")))
            .map_err(PipelineError::SegmentationFailed)?;

        response
            .masks
            .into_iter()
            .map(|m| {
                let gray = decode_png(&m.mask)
                    .map_err(PipelineError::SegmentationFailed)?
                    .to_luma8();
                Ok(ScoredMask {
                    mask: Mask::from_gray(&gray),
                    score: m.score,
                })
            })
            .collect()
    }
}

impl InpaintModel for HttpVisionClient {
    fn native_size(&self) -> u32 {
        self.inpaint.native_size
    }

    fn inpaint(&mut self, image: &Frame, mask: &Mask, prompt: &str) -> Result<Frame> {
        let _span = tracing::debug_span!("inpaint").entered();
        let request = InpaintRequest {
            image: encode_png(&DynamicImage::ImageRgb8(image.clone()))?,
            mask: encode_png(&DynamicImage::ImageLuma8(mask.to_gray()))?,
            prompt,
            negative_prompt: self.inpaint.negative_prompt.as_deref(),
            steps: self.inpaint.steps,
            guidance_scale: self.inpaint.guidance_scale,
        };

        let response: InpaintResponse = self
            .post("/inpaint", &request)
            .and_then(|r| r.json().map_err(|e| format!("bad /inpaint body: {e}")))
            .map_err(PipelineError::GenerationFailed)?;

        let generated = decode_png(&response.image).map_err(PipelineError::GenerationFailed)?;
        Ok(generated.to_rgb8())
    }
}

/// PNG-encode and base64 an image for a JSON body.
pub fn encode_png(image: &DynamicImage) -> Result<String> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(STANDARD.encode(buf.into_inner()))
}

/// Inverse of [`encode_png`]; tolerates a `data:...;base64,` prefix.
pub fn decode_png(encoded: &str) -> std::result::Result<DynamicImage, String> {
    let payload = encoded
        .split_once(";base64,")
        .map(|(_, data)| data)
        .unwrap_or(encoded);
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| format!("invalid base64 image: {e}"))?;
    image::load_from_memory(&bytes).map_err(|e| format!("undecodable image: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn png_payload_survives_base64() {
        let gray = GrayImage::from_fn(4, 3, |x, _| Luma([if x < 2 { 0 } else { 255 }]));
        let encoded = encode_png(&DynamicImage::ImageLuma8(gray.clone())).unwrap();
        let decoded = decode_png(&encoded).unwrap().to_luma8();
        assert_eq!(decoded, gray);

        let with_prefix = format!("data:image/png;base64,{encoded}");
        assert_eq!(decode_png(&with_prefix).unwrap().to_luma8(), gray);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_png("not base64 at all!").is_err());
        assert!(decode_png(&STANDARD.encode(b"plain text")).is_err());
    }

    #[test]
    fn point_prompt_serialises_without_box() {
        let request = SegmentRequest {
            image: String::new(),
            bbox: None,
            point: Some([3.0, 4.0]),
            label: Some(1),
            multimask: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("box").is_none());
        assert_eq!(json["point"], serde_json::json!([3.0, 4.0]));
        assert_eq!(json["label"], 1);
    }

    #[test]
    fn trailing_slash_is_dropped() {
        let client = HttpVisionClient::new("http://localhost:9000/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:9000");
        assert_eq!(client.native_size(), 512);
    }
}
