//! Error taxonomy shared by every pipeline stage.
//!
//! "No detection" is deliberately absent: an empty detector result is a normal
//! outcome and is reported through [`crate::pipeline::ReplaceOutcome`].

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The detector or landmark model could not produce output.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Segmentation failed: {0}")]
    SegmentationFailed(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// Non-2xx response to a job submission. Never retried here.
    #[error("Remote submission rejected ({status}): {body}")]
    RemoteSubmission { status: u16, body: String },

    /// Terminal FAILED status. `payload` is the raw status body.
    #[error("Remote job {job_id} failed: {payload}")]
    RemoteJobFailed {
        job_id: String,
        payload: serde_json::Value,
    },

    /// Non-2xx response on any other remote call (poll, download, TTS, clone).
    #[error("Remote request failed ({status}): {body}")]
    RemoteRequest { status: u16, body: String },

    #[error("Polling for job {job_id} timed out after {attempts} attempts")]
    PollTimeout { job_id: String, attempts: u32 },

    #[error("Degenerate geometry: {0}")]
    GeometryDegenerate(String),

    #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    #[error("Media tool failed: {0}")]
    MediaTool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn model_unavailable(msg: impl Into<String>) -> Self {
        Self::ModelUnavailable(msg.into())
    }

    pub fn segmentation_failed(msg: impl Into<String>) -> Self {
        Self::SegmentationFailed(msg.into())
    }

    pub fn generation_failed(msg: impl Into<String>) -> Self {
        Self::GenerationFailed(msg.into())
    }

    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::GeometryDegenerate(msg.into())
    }

    /// True for failures of a single frame's processing stage. Interactive
    /// loops log these and carry on with the unmodified frame.
    pub fn is_stage_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::ModelUnavailable(_)
                | PipelineError::SegmentationFailed(_)
                | PipelineError::GenerationFailed(_)
                | PipelineError::GeometryDegenerate(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_failures_are_classified() {
        assert!(PipelineError::model_unavailable("x").is_stage_failure());
        assert!(PipelineError::segmentation_failed("x").is_stage_failure());
        assert!(PipelineError::generation_failed("x").is_stage_failure());
        assert!(PipelineError::geometry("x").is_stage_failure());
        assert!(!PipelineError::RemoteSubmission {
            status: 400,
            body: "bad".into()
        }
        .is_stage_failure());
    }

    #[test]
    fn job_failure_carries_raw_payload() {
        let err = PipelineError::RemoteJobFailed {
            job_id: "abc".into(),
            payload: serde_json::json!({"status": "FAILED", "error": "boom"}),
        };
        let text = err.to_string();
        assert!(text.contains("abc"));
        assert!(text.contains("boom"));
    }
}
