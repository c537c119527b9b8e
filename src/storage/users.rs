//! Operator accounts
//!
//! Operators sign in before charging. The operator name and lane written to
//! the audit log come from the signed-in account, not from the command line.
//! Passwords are stored as hex SHA-256 digests.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info, warn};

const DEFAULT_USERNAME: &str = "admin";
const DEFAULT_PASSWORD: &str = "admin123";
const DEFAULT_LANE: &str = "1";

/// A signed-in operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operator {
    pub username: String,
    /// Lane the operator is assigned to
    pub lane_id: String,
}

/// Hex SHA-256 digest of a password
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Operator accounts stored next to the audit log
pub struct UserStore {
    conn: Mutex<Connection>,
}

impl UserStore {
    /// Open or create the accounts table in the database at path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open user database {:?}", path))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema
    pub fn init_schema(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    password TEXT NOT NULL,
                    lane_id TEXT NOT NULL
                );",
            )
            .context("Failed to create users table")?;
        Ok(())
    }

    /// Add an operator; returns false when the username is taken
    pub fn add_user(&self, username: &str, password: &str, lane_id: &str) -> Result<bool> {
        let username = username.trim();
        let lane_id = lane_id.trim();
        if username.is_empty() || password.is_empty() || lane_id.is_empty() {
            anyhow::bail!("username, password and lane are required");
        }

        let inserted = self
            .conn
            .lock()
            .execute(
                "INSERT OR IGNORE INTO users (username, password, lane_id) VALUES (?1, ?2, ?3)",
                params![username, hash_password(password), lane_id],
            )
            .with_context(|| format!("Failed to add user {}", username))?;

        if inserted == 1 {
            info!("Added operator {} on lane {}", username, lane_id);
        }
        Ok(inserted == 1)
    }

    /// Create the default operator when there are no accounts yet
    pub fn ensure_default_user(&self) -> Result<()> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("Failed to count users")?;

        if count == 0 {
            self.add_user(DEFAULT_USERNAME, DEFAULT_PASSWORD, DEFAULT_LANE)?;
            warn!(
                "Created default operator '{}'; add your own accounts with `tollbooth user add`",
                DEFAULT_USERNAME
            );
        }
        Ok(())
    }

    /// Check credentials and return the operator on success
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Option<Operator>> {
        let operator = self
            .conn
            .lock()
            .query_row(
                "SELECT username, lane_id FROM users WHERE username = ?1 AND password = ?2",
                params![username.trim(), hash_password(password)],
                |row| {
                    Ok(Operator {
                        username: row.get(0)?,
                        lane_id: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to look up user")?;

        match &operator {
            Some(op) => debug!("Operator {} signed in on lane {}", op.username, op.lane_id),
            None => warn!("Sign-in failed for {}", username),
        }
        Ok(operator)
    }

    /// All operators, by username
    pub fn list(&self) -> Result<Vec<Operator>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT username, lane_id FROM users ORDER BY username")?;
        let users = stmt
            .query_map([], |row| {
                Ok(Operator {
                    username: row.get(0)?,
                    lane_id: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read users")?;
        Ok(users)
    }
}
