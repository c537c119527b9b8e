//! SQLite audit log of vehicles that passed the lane

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::ledger::TagStatus;
use crate::toll::VehicleClass;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A charged or operator-approved passage to record
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub plate: String,
    pub vehicle_class: VehicleClass,
    pub tag_status: TagStatus,
    pub operator: String,
    pub lane_id: String,
    pub timestamp: DateTime<Local>,
}

/// A row read back from the audit log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedVehicle {
    pub id: i64,
    pub plate: String,
    pub vehicle_type: String,
    pub tag_status: String,
    pub operator: String,
    pub lane_id: String,
    pub timestamp: String,
}

/// Append-only audit sink
pub trait AuditLog: Send + Sync {
    /// Record an entry and return its id
    fn append(&self, entry: &AuditEntry) -> Result<i64>;
}

/// Audit log stored in a SQLite database
pub struct SqliteAuditLog {
    conn: Mutex<Connection>,
}

impl SqliteAuditLog {
    /// Open or create the database at path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open audit database {:?}", path))?;

        let log = Self {
            conn: Mutex::new(conn),
        };
        log.init_schema()?;

        info!("Audit log opened at {:?}", path);
        Ok(log)
    }

    /// Initialize database schema
    pub fn init_schema(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS vehicle_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    plate TEXT NOT NULL,
                    vehicle_type TEXT NOT NULL,
                    tag_status TEXT NOT NULL,
                    operator TEXT NOT NULL,
                    lane_id TEXT NOT NULL,
                    timestamp TEXT NOT NULL
                );",
            )
            .context("Failed to create vehicle_logs table")?;
        Ok(())
    }

    /// Most recent entries, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<LoggedVehicle>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, plate, vehicle_type, tag_status, operator, lane_id, timestamp
             FROM vehicle_logs ORDER BY id DESC LIMIT ?1",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(LoggedVehicle {
                    id: row.get(0)?,
                    plate: row.get(1)?,
                    vehicle_type: row.get(2)?,
                    tag_status: row.get(3)?,
                    operator: row.get(4)?,
                    lane_id: row.get(5)?,
                    timestamp: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read vehicle_logs")?;

        Ok(rows)
    }
}

impl AuditLog for SqliteAuditLog {
    fn append(&self, entry: &AuditEntry) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO vehicle_logs (plate, vehicle_type, tag_status, operator, lane_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.plate,
                entry.vehicle_class.to_string(),
                entry.tag_status.to_string(),
                entry.operator,
                entry.lane_id,
                entry.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            ],
        )
        .with_context(|| format!("Failed to log vehicle {}", entry.plate))?;

        let id = conn.last_insert_rowid();
        debug!("Logged {} as entry {}", entry.plate, id);
        Ok(id)
    }
}
