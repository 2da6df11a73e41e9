//! Submit → poll → download, with the waiting split out so tests never sleep.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::job::{GenerationJob, StatusSnapshot};
use crate::error::{PipelineError, Result};

/// How long to wait between polls and how long to wait overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(600),
            max_attempts: None,
        }
    }
}

impl WaitPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

/// Monotonic time source.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `Instant` and `thread::sleep`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A remote service that runs one kind of generation job.
pub trait JobApi {
    type Request;

    /// Start a job. A non-2xx answer is `RemoteSubmission` and is never retried.
    fn submit(&self, request: &Self::Request) -> Result<StatusSnapshot>;

    fn poll(&self, job_id: &str) -> Result<StatusSnapshot>;

    /// Fetch `url` into `dest`, returning the byte count.
    fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// A finished job whose artifact is on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedJob {
    pub job_id: String,
    pub output_url: String,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Poll until the job is terminal or the policy runs out.
pub fn wait_for_completion<A, C>(
    api: &A,
    mut job: GenerationJob,
    policy: &WaitPolicy,
    clock: &C,
) -> Result<GenerationJob>
where
    A: JobApi + ?Sized,
    C: Clock + ?Sized,
{
    let deadline = clock.now() + policy.timeout;
    let mut attempts = 0u32;

    while !job.is_terminal() {
        let out_of_attempts = policy.max_attempts.is_some_and(|max| attempts >= max);
        if clock.now() >= deadline || out_of_attempts {
            return Err(PipelineError::PollTimeout {
                job_id: job.id().to_string(),
                attempts,
            });
        }

        clock.sleep(policy.interval);
        attempts += 1;
        let snapshot = api.poll(job.id())?;
        debug!("Poll {} for {}: {}", attempts, job.id(), snapshot.status);
        job.apply(snapshot);
    }

    Ok(job)
}

/// Submit `request`, wait for it, and download the result to `dest`.
pub fn run_job<A, C>(
    api: &A,
    request: &A::Request,
    policy: &WaitPolicy,
    clock: &C,
    dest: &Path,
) -> Result<CompletedJob>
where
    A: JobApi + ?Sized,
    C: Clock + ?Sized,
{
    let submitted = api.submit(request)?;
    info!("Submitted job {} ({})", submitted.id, submitted.status);

    let job = wait_for_completion(api, GenerationJob::from_submission(submitted), policy, clock)?;
    let output_url = job.outcome()?.to_string();

    info!("Downloading {} to {}", output_url, dest.display());
    let bytes = api.download(&output_url, dest)?;

    Ok(CompletedJob {
        job_id: job.id().to_string(),
        output_url,
        path: dest.to_path_buf(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::job::JobStatus;
    use crate::remote::{LipSyncRequest, SpeechProvider};
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeClock {
        now: Cell<Duration>,
        sleeps: Cell<u32>,
    }

    impl Clock for FakeClock {
        fn now(&self) -> Duration {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.now.set(self.now.get() + duration);
            self.sleeps.set(self.sleeps.get() + 1);
        }
    }

    struct ScriptedApi {
        submit: RefCell<Option<Result<StatusSnapshot>>>,
        polls: RefCell<VecDeque<StatusSnapshot>>,
        downloads: RefCell<Vec<String>>,
        submitted: RefCell<Vec<serde_json::Value>>,
    }

    impl ScriptedApi {
        fn new(submit: Result<StatusSnapshot>, polls: Vec<StatusSnapshot>) -> Self {
            Self {
                submit: RefCell::new(Some(submit)),
                polls: RefCell::new(polls.into()),
                downloads: RefCell::new(Vec::new()),
                submitted: RefCell::new(Vec::new()),
            }
        }
    }

    impl JobApi for ScriptedApi {
        type Request = LipSyncRequest;

        fn submit(&self, request: &LipSyncRequest) -> Result<StatusSnapshot> {
            self.submitted.borrow_mut().push(serde_json::to_value(request)?);
            self.submit
                .borrow_mut()
                .take()
                .unwrap_or_else(|| panic!("submitted twice"))
        }

        fn poll(&self, job_id: &str) -> Result<StatusSnapshot> {
            assert_eq!(job_id, "job-1");
            Ok(self
                .polls
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| snap("PENDING", None)))
        }

        fn download(&self, url: &str, dest: &Path) -> Result<u64> {
            self.downloads.borrow_mut().push(url.to_string());
            std::fs::write(dest, b"mp4 bytes")?;
            Ok(9)
        }
    }

    fn spoken(script: &str) -> LipSyncRequest {
        LipSyncRequest::with_script(
            "http://x/video",
            SpeechProvider {
                name: "elevenlabs".into(),
                voice_id: "voice-1".into(),
                script: script.into(),
            },
        )
    }

    fn snap(status: &str, url: Option<&str>) -> StatusSnapshot {
        let mut raw = json!({"id": "job-1", "status": status});
        if let Some(url) = url {
            raw["outputUrl"] = json!(url);
        }
        StatusSnapshot::from_json(raw).unwrap()
    }

    #[test]
    fn completed_job_downloads_exactly_the_output_url() {
        let api = ScriptedApi::new(
            Ok(snap("PENDING", None)),
            vec![
                snap("PENDING", None),
                snap("PROCESSING", None),
                snap("COMPLETED", Some("http://x/out.mp4")),
            ],
        );
        let clock = FakeClock::default();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp4");

        let done = run_job(&api, &spoken("hello"), &WaitPolicy::default(), &clock, &dest).unwrap();

        assert_eq!(done.output_url, "http://x/out.mp4");
        assert_eq!(*api.downloads.borrow(), vec!["http://x/out.mp4".to_string()]);
        assert_eq!(std::fs::read(&dest).unwrap(), b"mp4 bytes");
        assert_eq!(clock.sleeps.get(), 3);
        assert_eq!(clock.now(), Duration::from_millis(1500));

        let submitted = api.submitted.borrow();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0]["input"][0], json!({"type": "video", "url": "http://x/video"}));
        assert_eq!(submitted[0]["input"][1]["provider"]["script"], "hello");
        assert_eq!(submitted[0]["input"][1]["provider"]["voiceId"], "voice-1");
    }

    #[test]
    fn failed_job_surfaces_payload_without_download() {
        let failed = StatusSnapshot::from_json(json!({
            "id": "job-1",
            "status": "FAILED",
            "error": "bad input"
        }))
        .unwrap();
        let api = ScriptedApi::new(Ok(snap("PROCESSING", None)), vec![failed]);
        let dir = tempfile::tempdir().unwrap();

        let err = run_job(
            &api,
            &spoken(""),
            &WaitPolicy::default(),
            &FakeClock::default(),
            &dir.path().join("x.mp4"),
        )
        .unwrap_err();

        match err {
            PipelineError::RemoteJobFailed { job_id, payload } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(payload["error"], "bad input");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(api.downloads.borrow().is_empty());
    }

    #[test]
    fn timeout_is_enforced_by_the_policy() {
        let api = ScriptedApi::new(Ok(snap("PENDING", None)), Vec::new());
        let policy = WaitPolicy::new(Duration::from_millis(500), Duration::from_secs(2));
        let dir = tempfile::tempdir().unwrap();

        let err = run_job(&api, &spoken(""), &policy, &FakeClock::default(), &dir.path().join("x"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::PollTimeout { attempts: 4, .. }));
    }

    #[test]
    fn attempt_cap_stops_polling() {
        let api = ScriptedApi::new(Ok(snap("PENDING", None)), Vec::new());
        let policy = WaitPolicy::default().with_max_attempts(2);
        let clock = FakeClock::default();
        let job = GenerationJob::from_submission(snap("PENDING", None));

        let err = wait_for_completion(&api, job, &policy, &clock).unwrap_err();
        assert!(matches!(err, PipelineError::PollTimeout { attempts: 2, .. }));
        assert_eq!(clock.sleeps.get(), 2);
    }

    #[test]
    fn submission_error_stops_before_polling() {
        let api = ScriptedApi::new(
            Err(PipelineError::RemoteSubmission {
                status: 401,
                body: "bad key".into(),
            }),
            vec![snap("COMPLETED", Some("http://x/out.mp4"))],
        );
        let clock = FakeClock::default();
        let dir = tempfile::tempdir().unwrap();

        let err = run_job(&api, &spoken(""), &WaitPolicy::default(), &clock, &dir.path().join("x"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::RemoteSubmission { status: 401, .. }));
        assert_eq!(clock.sleeps.get(), 0);
        assert_eq!(api.polls.borrow().len(), 1);
    }

    #[test]
    fn already_terminal_submission_skips_polling() {
        let api = ScriptedApi::new(Ok(snap("COMPLETED", Some("http://x/now.mp4"))), Vec::new());
        let clock = FakeClock::default();
        let job = GenerationJob::from_submission(snap("COMPLETED", Some("http://x/now.mp4")));
        let job = wait_for_completion(&api, job, &WaitPolicy::default(), &clock).unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(clock.sleeps.get(), 0);
    }
}
