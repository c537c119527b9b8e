//! Storage Layer
//!
//! Audit log of charged vehicles and operator accounts in SQLite, and
//! evidence frames on disk.

pub mod database;
pub mod evidence;
pub mod users;

pub use database::{AuditEntry, AuditLog, SqliteAuditLog};
pub use evidence::EvidenceStore;
pub use users::{Operator, UserStore};

use anyhow::Result;
use std::path::{Path, PathBuf};

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "tollbooth", "TollboothAnpr")
        .ok_or_else(|| anyhow::anyhow!("Could not determine application directories"))
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Resolve a configured path against `base` unless it is absolute
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
