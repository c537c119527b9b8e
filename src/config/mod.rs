//! Application Configuration
//!
//! Lane, model, ledger, storage and fare settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::toll::FareSchedule;
use crate::vision::{DetectorConfig, RecognizerConfig};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Lane frame sampling
    pub lane: LaneConfig,
    /// Model files and inference settings
    pub models: ModelsConfig,
    /// Tag ledger source
    pub ledger: LedgerConfig,
    /// Audit log and evidence capture
    pub storage: StorageConfig,
    /// Fare per vehicle class
    pub fares: FareSchedule,
}

/// Lane settings
///
/// Operator and lane identity come from the signed-in account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    /// Run detection on every N-th frame
    pub detect_every_n_frames: u32,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            detect_every_n_frames: 10,
        }
    }
}

/// Model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Models directory, `<data_dir>/models` when unset
    pub dir: Option<PathBuf>,
    /// Plate detector model file name
    pub detector_file: String,
    /// Text recognizer model file name
    pub recognizer_file: String,
    /// Character dictionary file name
    pub dictionary_file: String,
    /// Detector inference settings
    pub detector: DetectorConfig,
    /// Recognizer inference settings
    pub recognizer: RecognizerConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            detector_file: "plate_detector.onnx".to_string(),
            recognizer_file: "plate_rec.onnx".to_string(),
            dictionary_file: "plate_dict.txt".to_string(),
            detector: DetectorConfig::default(),
            recognizer: RecognizerConfig::default(),
        }
    }
}

/// Tag ledger settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON file of tag records keyed by plate; empty ledger when unset
    pub records_path: Option<PathBuf>,
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding the audit log and operator accounts
    pub database_file: PathBuf,
    /// Directory for evidence frames
    pub capture_dir: PathBuf,
    /// Save a frame for every automatic deduction
    pub capture_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: PathBuf::from("logs.db"),
            capture_dir: PathBuf::from("captured"),
            capture_enabled: true,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}
