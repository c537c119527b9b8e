//! Toll Service
//!
//! Fare schedule, automatic deduction on an accepted plate and the
//! operator's manual transaction.

use chrono::Local;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::ledger::{TagLedger, TagStatus};
use crate::plate::PlateString;
use crate::storage::{AuditEntry, AuditLog, EvidenceStore};

/// Vehicle class used for fares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleClass {
    Car,
    Bus,
    Truck,
    Auto,
    Bike,
    Tractor,
    Unknown,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 7] = [
        VehicleClass::Car,
        VehicleClass::Bus,
        VehicleClass::Truck,
        VehicleClass::Auto,
        VehicleClass::Bike,
        VehicleClass::Tractor,
        VehicleClass::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Car => "Car",
            VehicleClass::Bus => "Bus",
            VehicleClass::Truck => "Truck",
            VehicleClass::Auto => "Auto",
            VehicleClass::Bike => "Bike",
            VehicleClass::Tractor => "Tractor",
            VehicleClass::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleClass {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        VehicleClass::ALL
            .into_iter()
            .find(|class| class.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TransactionError::UnknownVehicleClass(s.to_string()))
    }
}

/// Fare charged per vehicle class
///
/// Unlisted classes fall back to the car fare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FareSchedule {
    pub car: f64,
    pub bus: f64,
    pub truck: f64,
    pub auto: f64,
    pub bike: f64,
    pub tractor: f64,
}

impl Default for FareSchedule {
    fn default() -> Self {
        Self {
            car: 60.0,
            bus: 120.0,
            truck: 150.0,
            auto: 40.0,
            bike: 30.0,
            tractor: 80.0,
        }
    }
}

impl FareSchedule {
    pub fn fare(&self, class: VehicleClass) -> f64 {
        match class {
            VehicleClass::Car | VehicleClass::Unknown => self.car,
            VehicleClass::Bus => self.bus,
            VehicleClass::Truck => self.truck,
            VehicleClass::Auto => self.auto,
            VehicleClass::Bike => self.bike,
            VehicleClass::Tractor => self.tractor,
        }
    }
}

/// Result of an automatic deduction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome")]
pub enum TollOutcome {
    Charged {
        plate: String,
        vehicle_class: VehicleClass,
        fare: f64,
        balance: f64,
        entry_id: i64,
        evidence: Option<PathBuf>,
    },
    InsufficientBalance {
        plate: String,
        fare: f64,
        balance: f64,
    },
    TagInvalid {
        plate: String,
    },
    NoTag {
        plate: String,
    },
}

impl fmt::Display for TollOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TollOutcome::Charged {
                plate,
                vehicle_class,
                fare,
                balance,
                ..
            } => write!(
                f,
                "{}: charged {:.2} ({}), balance {:.2}",
                plate, fare, vehicle_class, balance
            ),
            TollOutcome::InsufficientBalance { plate, fare, balance } => write!(
                f,
                "{}: insufficient balance {:.2} for fare {:.2}",
                plate, balance, fare
            ),
            TollOutcome::TagInvalid { plate } => write!(f, "{}: tag invalid", plate),
            TollOutcome::NoTag { plate } => write!(f, "{}: no tag", plate),
        }
    }
}

/// Operator-entered transaction
#[derive(Debug, Clone)]
pub struct ManualTransaction {
    pub plate: String,
    pub vehicle_class: VehicleClass,
    pub amount: f64,
    /// Record the passage even when the tag is not valid
    pub proceed_without_tag: bool,
}

/// Result of an accepted manual transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualReceipt {
    pub plate: String,
    pub vehicle_class: VehicleClass,
    pub amount: f64,
    pub tag_status: TagStatus,
    /// True when the amount was deducted from the tag
    pub debited: bool,
    pub entry_id: i64,
}

/// Errors raised by the toll service
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("plate number is required")]
    MissingPlate,

    #[error("amount must be a positive number, got {0}")]
    InvalidAmount(f64),

    #[error("tag for {plate} is {status}; proceed without tag to record it")]
    TagRejected { plate: String, status: TagStatus },

    #[error("unknown vehicle class '{0}'")]
    UnknownVehicleClass(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Charges vehicles against the tag ledger and records them in the audit log
pub struct TollService {
    ledger: Arc<dyn TagLedger>,
    audit: Arc<dyn AuditLog>,
    evidence: Option<EvidenceStore>,
    fares: FareSchedule,
    operator: String,
    lane_id: String,
}

impl TollService {
    pub fn new(
        ledger: Arc<dyn TagLedger>,
        audit: Arc<dyn AuditLog>,
        fares: FareSchedule,
        operator: impl Into<String>,
        lane_id: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            audit,
            evidence: None,
            fares,
            operator: operator.into(),
            lane_id: lane_id.into(),
        }
    }

    /// Save a frame for every automatic deduction
    pub fn with_evidence(mut self, evidence: EvidenceStore) -> Self {
        self.evidence = Some(evidence);
        self
    }

    pub fn fares(&self) -> &FareSchedule {
        &self.fares
    }

    /// Charge the tag linked to an accepted plate
    ///
    /// Only a valid tag with enough balance is charged; every other case is
    /// reported without touching the ledger or the audit log. A charge that
    /// cannot be recorded is refunded and returned as an error.
    pub fn auto_deduct(&self, plate: &PlateString, frame: &RgbImage) -> anyhow::Result<TollOutcome> {
        let plate = plate.as_str();
        let record = self.ledger.lookup(plate);

        match record.status {
            TagStatus::NoTag => {
                return Ok(TollOutcome::NoTag {
                    plate: plate.to_string(),
                })
            }
            TagStatus::Invalid => {
                return Ok(TollOutcome::TagInvalid {
                    plate: plate.to_string(),
                })
            }
            TagStatus::Valid => {}
        }

        let fare = self.fares.fare(record.vehicle_class);
        if !record.can_pay(fare) || !self.ledger.debit(plate, fare) {
            return Ok(TollOutcome::InsufficientBalance {
                plate: plate.to_string(),
                fare,
                balance: record.balance,
            });
        }

        let now = Local::now();
        let entry = AuditEntry {
            plate: plate.to_string(),
            vehicle_class: record.vehicle_class,
            tag_status: record.status,
            operator: self.operator.clone(),
            lane_id: self.lane_id.clone(),
            timestamp: now,
        };
        let entry_id = self.append_or_refund(&entry, Some(fare))?;

        let evidence = self.evidence.as_ref().and_then(|store| {
            store
                .save(plate, frame, now)
                .map_err(|e| warn!("Evidence capture for {} failed: {:#}", plate, e))
                .ok()
        });

        let balance = self.ledger.lookup(plate).balance;
        info!(
            "Charged {} {:.2} ({}), balance {:.2}",
            plate, fare, record.vehicle_class, balance
        );

        Ok(TollOutcome::Charged {
            plate: plate.to_string(),
            vehicle_class: record.vehicle_class,
            fare,
            balance,
            entry_id,
            evidence,
        })
    }

    /// Record an operator-entered transaction
    pub fn manual_transaction(&self, request: &ManualTransaction) -> Result<ManualReceipt, TransactionError> {
        let plate = request.plate.trim().to_uppercase();
        if plate.is_empty() {
            return Err(TransactionError::MissingPlate);
        }
        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Err(TransactionError::InvalidAmount(request.amount));
        }

        let record = self.ledger.lookup(&plate);
        if record.status != TagStatus::Valid && !request.proceed_without_tag {
            return Err(TransactionError::TagRejected {
                plate,
                status: record.status,
            });
        }

        let debited = record.can_pay(request.amount) && self.ledger.debit(&plate, request.amount);
        if record.status == TagStatus::Valid && !debited {
            warn!(
                "Balance {:.2} for {} does not cover {:.2}; recorded without deduction",
                record.balance, plate, request.amount
            );
        }

        let entry = AuditEntry {
            plate: plate.clone(),
            vehicle_class: request.vehicle_class,
            tag_status: record.status,
            operator: self.operator.clone(),
            lane_id: self.lane_id.clone(),
            timestamp: Local::now(),
        };
        let entry_id = self.append_or_refund(&entry, debited.then_some(request.amount))?;

        info!(
            "Manual transaction for {} ({}) of {:.2}, debited: {}",
            plate, request.vehicle_class, request.amount, debited
        );

        Ok(ManualReceipt {
            plate,
            vehicle_class: request.vehicle_class,
            amount: request.amount,
            tag_status: record.status,
            debited,
            entry_id,
        })
    }

    /// Append to the audit log, crediting back `debited` if the append fails
    fn append_or_refund(&self, entry: &AuditEntry, debited: Option<f64>) -> anyhow::Result<i64> {
        match self.audit.append(entry) {
            Ok(id) => Ok(id),
            Err(e) => {
                if let Some(amount) = debited {
                    if self.ledger.credit(&entry.plate, amount) {
                        warn!("Audit append for {} failed; refunded {:.2}", entry.plate, amount);
                    } else {
                        error!(
                            "Audit append for {} failed and refund of {:.2} was refused",
                            entry.plate, amount
                        );
                    }
                }
                Err(e.context(format!("Failed to record passage of {}", entry.plate)))
            }
        }
    }
}
