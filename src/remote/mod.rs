//! Clients for the hosted generation services and the job orchestrator.

mod job;
mod lipsync;
mod poll;
mod script;
mod voice;

pub use job::{GenerationJob, JobStatus, StatusSnapshot};
pub use lipsync::{LipSyncClient, LipSyncInput, LipSyncRequest, SpeechProvider, DEFAULT_LIPSYNC_MODEL};
pub use poll::{run_job, wait_for_completion, Clock, CompletedJob, JobApi, SystemClock, WaitPolicy};
pub use script::{truncate_chars, ScriptWriter, DEFAULT_SCRIPT_MODEL, MAX_SCRIPT_CHARS};
pub use voice::{CartesiaClient, CloneOptions, ClonedVoice, OutputFormat, TtsRequest, VoiceRef};

use std::path::Path;

use reqwest::blocking::{Client, Response};
use tempfile::NamedTempFile;

use crate::error::{PipelineError, Result};

/// Turn a non-2xx response into `RemoteRequest`, keeping the body text.
pub(crate) fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(PipelineError::RemoteRequest {
        status: status.as_u16(),
        body,
    })
}

/// Plain GET of `url`, streamed into `dest`.
///
/// The body lands in a temporary file next to `dest` that is renamed into
/// place only once the transfer completes.
pub(crate) fn download_to(client: &Client, url: &str, dest: &Path) -> Result<u64> {
    let mut response = ensure_success(client.get(url).send()?)?;
    let dir = match dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    let bytes = response.copy_to(tmp.as_file_mut())?;
    tmp.persist(dest).map_err(|e| e.error)?;
    tracing::info!("Wrote {} bytes to {}", bytes, dest.display());
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Serve one response that promises `declared` bytes but sends `body`.
    fn serve_once(declared: usize, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request);
            let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {declared}\r\n\r\n");
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(body).unwrap();
        });
        format!("http://{addr}/out.mp4")
    }

    #[test]
    fn complete_download_replaces_dest() {
        let url = serve_once(5, b"fresh");
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp4");
        std::fs::write(&dest, b"old").unwrap();

        let bytes = download_to(&Client::new(), &url, &dest).unwrap();
        assert_eq!(bytes, 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"fresh");
    }

    #[test]
    fn cut_off_download_leaves_dest_untouched() {
        let url = serve_once(4096, b"partial");
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp4");
        std::fs::write(&dest, b"old").unwrap();

        assert!(download_to(&Client::new(), &url, &dest).is_err());
        assert_eq!(std::fs::read(&dest).unwrap(), b"old");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
