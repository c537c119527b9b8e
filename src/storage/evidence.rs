//! Evidence frames saved for automatic deductions

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::{ImageFormat, RgbImage};
use std::path::PathBuf;
use tracing::debug;

/// Writes frames as JPEG files named after the plate and capture time
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    dir: PathBuf,
}

impl EvidenceStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// File path for a capture of `plate` at `at`
    pub fn path_for(&self, plate: &str, at: DateTime<Local>) -> PathBuf {
        self.dir
            .join(format!("{}_{}.jpg", plate, at.format("%Y%m%d%H%M%S%6f")))
    }

    /// Save `frame` and return the written path
    pub fn save(&self, plate: &str, frame: &RgbImage, at: DateTime<Local>) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create capture directory {:?}", self.dir))?;

        let path = self.path_for(plate, at);
        frame
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("Failed to save evidence frame {:?}", path))?;

        debug!("Saved evidence frame {:?}", path);
        Ok(path)
    }
}
