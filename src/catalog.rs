//! Batch lip-sync over a directory of still images and voice clips.
//!
//! For every stub `x` the catalog takes `images/x.jpg` and each
//! `audio/x_*.mp3`, renders a still video long enough for the clip, has the
//! lip-sync service animate it, and stores the result as `videos/x_{i}.mp4`.
//! The index of everything produced is written to `db.json`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::media::{clip_length_secs, MediaTools};
use crate::remote::{run_job, Clock, JobApi, LipSyncRequest, WaitPolicy};
use crate::server::MediaPaths;

/// Frame rate of the rendered still videos.
pub const CATALOG_FPS: u32 = 25;

/// Where the catalog reads and writes, relative to one root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogLayout {
    pub images: PathBuf,
    pub audio: PathBuf,
    pub videos: PathBuf,
    pub index: PathBuf,
}

impl CatalogLayout {
    /// `root/images`, `root/audio`, `root/videos` and `root/db.json`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            images: root.join("images"),
            audio: root.join("audio"),
            videos: root.join("videos"),
            index: root.join("db.json"),
        }
    }

    pub fn image_for(&self, stub: &str) -> PathBuf {
        self.images.join(format!("{stub}.jpg"))
    }

    pub fn video_for(&self, stub: &str, index: usize) -> PathBuf {
        self.videos.join(format!("{stub}_{index}.mp4"))
    }

    /// `audio/{stub}_*.mp3`, sorted by file name.
    pub fn audio_for(&self, stub: &str) -> Result<Vec<PathBuf>> {
        let prefix = format!("{stub}_");
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.audio)?
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                if !path.is_file() {
                    return None;
                }
                let name = path.file_name()?.to_str()?;
                let is_clip = name.starts_with(&prefix)
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"));
                is_clip.then(|| path.clone())
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Stems of every `images/*.jpg`, sorted.
    pub fn discover_stubs(&self) -> Result<Vec<String>> {
        let mut stubs: Vec<String> = std::fs::read_dir(&self.images)?
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                let is_jpg = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg"));
                if !path.is_file() || !is_jpg {
                    return None;
                }
                Some(path.file_stem()?.to_str()?.to_string())
            })
            .collect();
        stubs.sort();
        Ok(stubs)
    }
}

/// One stub's row in `db.json`.
///
/// `clip_lengths[i]` and `video_paths[i]` belong to `audio_files[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub image_path: PathBuf,
    pub audio_files: Vec<PathBuf>,
    /// Seconds of still video rendered for each clip.
    pub clip_lengths: Vec<u32>,
    pub video_paths: Vec<PathBuf>,
}

/// Keyed by stub.
pub type Catalog = BTreeMap<String, CatalogEntry>;

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub layout: CatalogLayout,
    /// Files the media server hands to the lip-sync service.
    pub staging: MediaPaths,
    /// Public base URL of the media server, e.g. an ngrok tunnel.
    pub public_base: String,
    pub fps: u32,
    pub policy: WaitPolicy,
}

impl CatalogSettings {
    pub fn new(layout: CatalogLayout, public_base: impl Into<String>) -> Self {
        Self {
            layout,
            staging: MediaPaths::default(),
            public_base: public_base.into(),
            fps: CATALOG_FPS,
            policy: WaitPolicy::new(
                std::time::Duration::from_millis(250),
                std::time::Duration::from_secs(600),
            ),
        }
    }

    pub fn video_url(&self) -> String {
        format!("{}/video", self.public_base.trim_end_matches('/'))
    }

    pub fn audio_url(&self) -> String {
        format!("{}/audio", self.public_base.trim_end_matches('/'))
    }
}

/// Lip-sync every clip of every stub, then write the index.
///
/// A stub without an image is skipped. A clip whose job fails is logged and
/// left out of its entry; the rest of the batch carries on.
pub fn build_catalog<T, A, C>(
    tools: &T,
    api: &A,
    clock: &C,
    settings: &CatalogSettings,
    stubs: &[String],
) -> Result<Catalog>
where
    T: MediaTools + ?Sized,
    A: JobApi<Request = LipSyncRequest> + ?Sized,
    C: Clock + ?Sized,
{
    let layout = &settings.layout;
    std::fs::create_dir_all(&layout.videos)?;
    let request = LipSyncRequest::with_audio(settings.video_url(), settings.audio_url());
    let mut catalog = Catalog::new();

    for stub in stubs {
        let _span = tracing::info_span!("catalog", stub = stub.as_str()).entered();
        let image_path = layout.image_for(stub);
        if !image_path.is_file() {
            warn!("No image at {}, skipping", image_path.display());
            continue;
        }

        let audio_files = layout.audio_for(stub)?;
        if audio_files.is_empty() {
            info!("No audio clips for {}", stub);
        }

        let mut entry = CatalogEntry {
            image_path: image_path.clone(),
            ..CatalogEntry::default()
        };

        for (i, audio) in audio_files.iter().enumerate() {
            match sync_clip(tools, api, clock, settings, &request, &image_path, audio, i, stub) {
                Ok((seconds, video)) => {
                    entry.audio_files.push(audio.clone());
                    entry.clip_lengths.push(seconds);
                    entry.video_paths.push(video);
                }
                Err(e) => warn!("Skipping {}: {}", audio.display(), e),
            }
        }

        catalog.insert(stub.clone(), entry);
    }

    write_index(&catalog, &layout.index)?;
    Ok(catalog)
}

#[allow(clippy::too_many_arguments)]
fn sync_clip<T, A, C>(
    tools: &T,
    api: &A,
    clock: &C,
    settings: &CatalogSettings,
    request: &LipSyncRequest,
    image: &Path,
    audio: &Path,
    index: usize,
    stub: &str,
) -> Result<(u32, PathBuf)>
where
    T: MediaTools + ?Sized,
    A: JobApi<Request = LipSyncRequest> + ?Sized,
    C: Clock + ?Sized,
{
    let duration = tools.media_duration(audio)?;
    let seconds = clip_length_secs(duration, settings.fps);
    debug!("{} is {:.2}s, rendering {}s", audio.display(), duration, seconds);

    tools.render_still_video(image, seconds, settings.fps, &settings.staging.video)?;
    std::fs::copy(audio, &settings.staging.audio)?;

    let video = settings.layout.video_for(stub, index);
    let done = run_job(api, request, &settings.policy, clock, &video)?;
    info!("Job {} saved to {}", done.job_id, video.display());
    Ok((seconds, video))
}

/// Pretty-printed JSON, keys sorted by stub.
pub fn write_index(catalog: &Catalog, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, catalog)?;
    info!("Wrote {} entries to {}", catalog.len(), path.display());
    Ok(())
}

pub fn read_index(path: &Path) -> Result<Catalog> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn audio_clips_match_the_stub_prefix_only() {
        let dir = tempfile::tempdir().unwrap();
        let layout = CatalogLayout::under(dir.path());
        for name in ["snow_white_1.mp3", "snow_white_0.mp3", "snow_white_x.wav", "mickey_0.mp3"] {
            touch(&layout.audio.join(name));
        }

        let clips = layout.audio_for("snow_white").unwrap();
        assert_eq!(
            clips,
            vec![layout.audio.join("snow_white_0.mp3"), layout.audio.join("snow_white_1.mp3")]
        );
        assert_eq!(layout.audio_for("mickey").unwrap(), vec![layout.audio.join("mickey_0.mp3")]);
    }

    #[test]
    fn stubs_come_from_jpg_stems() {
        let dir = tempfile::tempdir().unwrap();
        let layout = CatalogLayout::under(dir.path());
        for name in ["mickey_17.jpg", "aaron_judge.jpg", "notes.txt"] {
            touch(&layout.images.join(name));
        }
        assert_eq!(layout.discover_stubs().unwrap(), vec!["aaron_judge", "mickey_17"]);
    }

    #[test]
    fn index_uses_the_catalog_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let mut catalog = Catalog::new();
        catalog.insert(
            "mickey_17".into(),
            CatalogEntry {
                image_path: "db/images/mickey_17.jpg".into(),
                audio_files: vec!["db/audio/mickey_17_0.mp3".into()],
                clip_lengths: vec![6],
                video_paths: vec!["db/videos/mickey_17_0.mp4".into()],
            },
        );

        write_index(&catalog, &path).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["mickey_17"]["image_path"], "db/images/mickey_17.jpg");
        assert_eq!(raw["mickey_17"]["clip_lengths"], serde_json::json!([6]));
        assert_eq!(read_index(&path).unwrap(), catalog);
    }

    #[test]
    fn public_urls_drop_trailing_slash() {
        let settings = CatalogSettings::new(CatalogLayout::under("db"), "https://tunnel.example/");
        assert_eq!(settings.video_url(), "https://tunnel.example/video");
        assert_eq!(settings.audio_url(), "https://tunnel.example/audio");
    }
}
