//! Local view of a remote generation job.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Remote job status as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    /// Rejected and cancelled jobs are as final as failed ones.
    #[serde(alias = "REJECTED", alias = "CANCELED", alias = "CANCELLED")]
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStatus {
    id: String,
    status: JobStatus,
    #[serde(default)]
    output_url: Option<String>,
}

/// One poll (or submit) response, with the raw body kept for failure reports.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub output_url: Option<String>,
    pub raw: serde_json::Value,
}

impl StatusSnapshot {
    /// Parse `{id, status, outputUrl?}`.
    pub fn from_json(raw: serde_json::Value) -> Result<Self> {
        let wire: WireStatus = serde_json::from_value(raw.clone())?;
        Ok(Self {
            id: wire.id,
            status: wire.status,
            output_url: wire.output_url.filter(|u| !u.is_empty()),
            raw,
        })
    }
}

/// A submitted job. Status only ever moves forward.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationJob {
    id: String,
    status: JobStatus,
    output_url: Option<String>,
    last_payload: serde_json::Value,
}

impl GenerationJob {
    pub fn from_submission(snapshot: StatusSnapshot) -> Self {
        Self {
            id: snapshot.id,
            status: snapshot.status,
            output_url: snapshot.output_url,
            last_payload: snapshot.raw,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn output_url(&self) -> Option<&str> {
        self.output_url.as_deref()
    }

    pub fn last_payload(&self) -> &serde_json::Value {
        &self.last_payload
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fold a poll result into the job.
    ///
    /// Snapshots that would move the status backwards, or arrive after a
    /// terminal state, are ignored and `false` is returned.
    pub fn apply(&mut self, snapshot: StatusSnapshot) -> bool {
        if snapshot.id != self.id {
            tracing::warn!("Ignoring status for job {} while tracking {}", snapshot.id, self.id);
            return false;
        }
        if self.status.is_terminal() || snapshot.status.rank() < self.status.rank() {
            tracing::debug!(
                "Ignoring {} for job {} already {}",
                snapshot.status,
                self.id,
                self.status
            );
            return false;
        }
        if snapshot.status != self.status {
            tracing::info!("Job {}: {} -> {}", self.id, self.status, snapshot.status);
        }
        self.status = snapshot.status;
        if snapshot.output_url.is_some() {
            self.output_url = snapshot.output_url;
        }
        self.last_payload = snapshot.raw;
        true
    }

    /// URL of the finished artifact, or the failure with its raw payload.
    ///
    /// Only meaningful once the job is terminal.
    pub fn outcome(&self) -> Result<&str> {
        match self.status {
            JobStatus::Completed => self.output_url.as_deref().ok_or_else(|| {
                PipelineError::RemoteJobFailed {
                    job_id: self.id.clone(),
                    payload: self.last_payload.clone(),
                }
            }),
            _ => Err(PipelineError::RemoteJobFailed {
                job_id: self.id.clone(),
                payload: self.last_payload.clone(),
            }),
        }
    }
}
