//! Tag Ledger
//!
//! Balance lookup and debit for electronic toll tags. The in-memory ledger
//! is seeded from a JSON file of tag records; plates it does not know are
//! reported as having no tag.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::toll::VehicleClass;

/// Status of the tag linked to a plate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagStatus {
    Valid,
    Invalid,
    NoTag,
}

impl fmt::Display for TagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagStatus::Valid => write!(f, "Valid"),
            TagStatus::Invalid => write!(f, "Invalid"),
            TagStatus::NoTag => write!(f, "No Tag"),
        }
    }
}

/// Tag details for a plate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub status: TagStatus,
    pub tag_id: Option<String>,
    /// Remaining balance, never negative
    pub balance: f64,
    pub vehicle_class: VehicleClass,
}

impl TagRecord {
    /// Record reported for plates without a tag
    pub fn no_tag() -> Self {
        Self {
            status: TagStatus::NoTag,
            tag_id: None,
            balance: 0.0,
            vehicle_class: VehicleClass::Unknown,
        }
    }

    /// True when a debit of `amount` would succeed
    pub fn can_pay(&self, amount: f64) -> bool {
        self.status == TagStatus::Valid && self.balance >= amount
    }
}

/// Balance lookup and debit service
pub trait TagLedger: Send + Sync {
    /// Look up the tag for a plate
    fn lookup(&self, plate: &str) -> TagRecord;

    /// Deduct `amount`; succeeds only for a valid tag with enough balance
    fn debit(&self, plate: &str, amount: f64) -> bool;

    /// Return `amount` to a tag, undoing an earlier debit
    fn credit(&self, plate: &str, amount: f64) -> bool;
}

/// Tag ledger held in memory
#[derive(Default)]
pub struct InMemoryTagLedger {
    records: RwLock<HashMap<String, TagRecord>>,
}

impl InMemoryTagLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger from plate -> record pairs
    pub fn with_records(records: impl IntoIterator<Item = (String, TagRecord)>) -> Self {
        let records = records
            .into_iter()
            .map(|(plate, record)| (plate.to_uppercase(), record))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    /// Load tag records from a JSON object keyed by plate
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tag records {:?}", path))?;
        let records: HashMap<String, TagRecord> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse tag records {:?}", path))?;

        info!("Loaded {} tag records from {:?}", records.len(), path);
        Ok(Self::with_records(records))
    }
}

impl TagLedger for InMemoryTagLedger {
    fn lookup(&self, plate: &str) -> TagRecord {
        self.records
            .read()
            .get(&plate.to_uppercase())
            .cloned()
            .unwrap_or_else(TagRecord::no_tag)
    }

    fn debit(&self, plate: &str, amount: f64) -> bool {
        if !amount.is_finite() || amount < 0.0 {
            warn!("Refusing debit of {} for {}", amount, plate);
            return false;
        }

        let mut records = self.records.write();
        match records.get_mut(&plate.to_uppercase()) {
            Some(record) if record.can_pay(amount) => {
                record.balance -= amount;
                debug!("Debited {:.2} from {}, balance {:.2}", amount, plate, record.balance);
                true
            }
            _ => false,
        }
    }

    fn credit(&self, plate: &str, amount: f64) -> bool {
        if !amount.is_finite() || amount < 0.0 {
            warn!("Refusing credit of {} for {}", amount, plate);
            return false;
        }

        match self.records.write().get_mut(&plate.to_uppercase()) {
            Some(record) => {
                record.balance += amount;
                debug!("Credited {:.2} to {}, balance {:.2}", amount, plate, record.balance);
                true
            }
            None => false,
        }
    }
}
