//! Frame Capture Layer
//!
//! Frame sources feeding the lane. Image files on disk can be replayed as
//! a frame stream in name order.

pub mod frame;

pub use frame::CapturedFrame;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// A stream of frames
pub trait FrameSource {
    /// Next frame, or `None` once the source is exhausted
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>>;
}

/// Replays image files as frames
pub struct DirectorySource {
    paths: Vec<PathBuf>,
    position: usize,
    sequence: u64,
}

impl DirectorySource {
    /// Collect the image files in `dir`, sorted by file name
    pub fn open(dir: &Path) -> Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory {:?}", dir))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image_file(path))
            .collect();
        paths.sort();

        info!("Found {} frames in {:?}", paths.len(), dir);
        Ok(Self::from_paths(paths))
    }

    /// Replay the given files in order
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            position: 0,
            sequence: 0,
        }
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        while let Some(path) = self.paths.get(self.position) {
            self.position += 1;
            match image::open(path) {
                Ok(img) => {
                    self.sequence += 1;
                    return Ok(Some(CapturedFrame::new(img.to_rgb8(), self.sequence)));
                }
                Err(e) => warn!("Skipping unreadable frame {:?}: {}", path, e),
            }
        }
        Ok(None)
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}
