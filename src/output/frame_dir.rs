use super::OutputSink;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::frame::Frame;

/// Writes each frame as `frame_000001.png`, `frame_000002.png`, ... into a directory.
pub struct FrameDirSink {
    dir: PathBuf,
    count: u64,
    resolution: (u32, u32),
}

impl FrameDirSink {
    pub fn new<P: AsRef<Path>>(dir: P, width: u32, height: u32) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        tracing::info!("Writing frames to {}", dir.display());
        Ok(Self {
            dir,
            count: 0,
            resolution: (width, height),
        })
    }

    /// Path of the most recently written frame.
    pub fn last_path(&self) -> Option<PathBuf> {
        (self.count > 0).then(|| self.frame_path(self.count))
    }

    fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{index:06}.png"))
    }
}

impl OutputSink for FrameDirSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.count += 1;
        let path = self.frame_path(self.count);
        frame
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}
