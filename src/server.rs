//! Serves the current input video and audio so a remote worker can fetch them.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::{info, warn};

/// Files exposed by the media server. They are re-read on every request, so
/// replacing a file on disk is picked up without a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPaths {
    pub video: PathBuf,
    pub audio: PathBuf,
}

impl Default for MediaPaths {
    fn default() -> Self {
        Self {
            video: PathBuf::from("input.mp4"),
            audio: PathBuf::from("input_audio.mp3"),
        }
    }
}

/// `GET /video` (video/mp4) and `GET /audio` (audio/mpeg).
pub fn router(paths: MediaPaths) -> Router {
    Router::new()
        .route("/video", get(serve_video))
        .route("/audio", get(serve_audio))
        .route("/audio/", get(serve_audio))
        .with_state(Arc::new(paths))
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, paths: MediaPaths) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        "Media server on http://{} (video: {}, audio: {})",
        listener.local_addr()?,
        paths.video.display(),
        paths.audio.display()
    );
    axum::serve(listener, router(paths)).await
}

async fn serve_video(State(paths): State<Arc<MediaPaths>>) -> Response {
    send_file(&paths.video, "video/mp4").await
}

async fn serve_audio(State(paths): State<Arc<MediaPaths>>) -> Response {
    send_file(&paths.audio, "audio/mpeg").await
}

async fn send_file(path: &Path, mime: &'static str) -> Response {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            info!("Serving {} ({} bytes)", path.display(), bytes.len());
            ([(header::CONTENT_TYPE, mime)], bytes).into_response()
        }
        Err(e) => {
            warn!("Cannot serve {}: {}", path.display(), e);
            (StatusCode::NOT_FOUND, format!("{} not available", path.display())).into_response()
        }
    }
}
