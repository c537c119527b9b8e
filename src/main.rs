//! Tollbooth ANPR - toll lane plate recognition
//!
//! Reads number plates from lane frames, charges the linked FASTag-style
//! tag and keeps an audit log of every vehicle that passed.

mod app;
mod capture;
mod config;
mod ledger;
mod plate;
mod storage;
mod toll;
mod vision;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::app::{LaneEvent, LaneSession, LaneWorker, PlateReader};
use crate::capture::{DirectorySource, FrameSource};
use crate::config::AppConfig;
use crate::ledger::InMemoryTagLedger;
use crate::plate::AcceptedPlate;
use crate::storage::{EvidenceStore, Operator, SqliteAuditLog, UserStore};
use crate::toll::{ManualTransaction, TollService, VehicleClass};
use crate::vision::{ModelManager, ModelType, OnnxPlateDetector, OnnxTextRecognizer};

/// Tollbooth ANPR - plate recognition and tag charging for a toll lane
#[derive(Parser, Debug)]
#[command(name = "tollbooth")]
#[command(about = "Reads number plates at a toll lane and charges the linked tag")]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read plates from image files
    Scan {
        /// Images to scan
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replay a directory of frames through the lane
    Run {
        /// Directory of frame images, replayed in name order
        dir: PathBuf,

        /// Replay rate in frames per second
        #[arg(long, default_value = "30")]
        fps: u32,

        #[command(flatten)]
        login: Credentials,
    },

    /// Record a manual transaction
    Charge {
        #[command(flatten)]
        login: Credentials,

        /// Vehicle plate number
        #[arg(long)]
        plate: String,

        /// Vehicle class (Car, Bus, Truck, Auto, Bike, Tractor)
        #[arg(long)]
        class: VehicleClass,

        /// Amount to charge (defaults to the fare for the class)
        #[arg(long)]
        amount: Option<f64>,

        /// Record the passage even when the tag is missing or invalid
        #[arg(long)]
        without_tag: bool,
    },

    /// Manage operator accounts
    User {
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Show recent audit log entries
    Logs {
        /// Number of entries to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show model file status
    Models,

    /// Print the effective configuration
    Config {
        /// Write it to the configuration file
        #[arg(long)]
        write: bool,
    },
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Add an operator account
    Add {
        #[command(flatten)]
        login: Credentials,

        /// Name of the new operator
        username: String,

        /// Password for the new operator
        #[arg(long)]
        new_password: String,

        /// Lane the new operator works
        #[arg(long)]
        lane: String,
    },

    /// List operator accounts
    List,
}

/// Operator sign-in
#[derive(clap::Args, Debug)]
struct Credentials {
    /// Operator username
    #[arg(long)]
    user: String,

    /// Operator password
    #[arg(long)]
    password: String,
}

/// Scan result for one image
#[derive(Debug, Serialize)]
struct ScanResult {
    image: PathBuf,
    plate: Option<AcceptedPlate>,
    error: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => storage::get_config_dir()?.join("config.toml"),
    };
    let config = load_or_create_config(&config_path, args.config.is_some())?;
    let data_dir = storage::get_data_dir()?;

    match args.command {
        Command::Scan { images, json } => scan(&config, &data_dir, &images, json),
        Command::Run { dir, fps, login } => {
            let operator = sign_in(&config, &data_dir, &login)?;
            run_lane(&config, &data_dir, &operator, &dir, fps)
        }
        Command::Charge {
            login,
            plate,
            class,
            amount,
            without_tag,
        } => {
            let operator = sign_in(&config, &data_dir, &login)?;
            charge(&config, &data_dir, &operator, plate, class, amount, without_tag)
        }
        Command::User { action } => manage_users(&config, &data_dir, action),
        Command::Logs { limit } => show_logs(&config, &data_dir, limit),
        Command::Models => show_models(&config, &data_dir),
        Command::Config { write } => show_config(&config, &config_path, write),
    }
}

/// Load configuration from file or fall back to defaults
///
/// An explicitly requested file must exist and parse.
fn load_or_create_config(path: &Path, explicit: bool) -> Result<AppConfig> {
    if explicit || path.exists() {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

fn model_manager(config: &AppConfig, data_dir: &Path) -> ModelManager {
    let models_dir = match &config.models.dir {
        Some(dir) => storage::resolve_path(data_dir, dir),
        None => data_dir.join("models"),
    };
    ModelManager::new(models_dir, &config.models)
}

/// Load the detector and recognizer models
fn build_reader(config: &AppConfig, data_dir: &Path) -> Result<PlateReader> {
    let models = model_manager(config, data_dir);

    let detector = OnnxPlateDetector::new(
        &models.require(ModelType::PlateDetector)?,
        config.models.detector.clone(),
    )?;
    let recognizer = OnnxTextRecognizer::new(
        &models.require(ModelType::TextRecognizer)?,
        &models.require(ModelType::Dictionary)?,
        config.models.recognizer.clone(),
    )?;

    Ok(PlateReader::new(Arc::new(detector), Arc::new(recognizer)))
}

fn database_path(config: &AppConfig, data_dir: &Path) -> PathBuf {
    storage::resolve_path(data_dir, &config.storage.database_file)
}

fn open_audit_log(config: &AppConfig, data_dir: &Path) -> Result<SqliteAuditLog> {
    SqliteAuditLog::open(&database_path(config, data_dir))
}

fn open_user_store(config: &AppConfig, data_dir: &Path) -> Result<UserStore> {
    let users = UserStore::open(&database_path(config, data_dir))?;
    users.ensure_default_user()?;
    Ok(users)
}

/// Check operator credentials against the account table
fn sign_in(config: &AppConfig, data_dir: &Path, login: &Credentials) -> Result<Operator> {
    let operator = open_user_store(config, data_dir)?
        .authenticate(&login.user, &login.password)?
        .ok_or_else(|| anyhow::anyhow!("Invalid username or password"))?;
    info!("Signed in as {} on lane {}", operator.username, operator.lane_id);
    Ok(operator)
}

/// Wire the ledger, audit log and evidence store into a toll service
fn build_toll(config: &AppConfig, data_dir: &Path, operator: &Operator) -> Result<TollService> {
    let ledger = match &config.ledger.records_path {
        Some(path) => InMemoryTagLedger::load(&storage::resolve_path(data_dir, path))?,
        None => {
            warn!("No tag records configured; every plate will report no tag");
            InMemoryTagLedger::new()
        }
    };
    let audit = open_audit_log(config, data_dir)?;

    let toll = TollService::new(
        Arc::new(ledger),
        Arc::new(audit),
        config.fares.clone(),
        operator.username.clone(),
        operator.lane_id.clone(),
    );

    Ok(if config.storage.capture_enabled {
        let dir = storage::resolve_path(data_dir, &config.storage.capture_dir);
        toll.with_evidence(EvidenceStore::new(dir))
    } else {
        toll
    })
}

fn scan(config: &AppConfig, data_dir: &Path, images: &[PathBuf], json: bool) -> Result<()> {
    let reader = build_reader(config, data_dir)?;

    let results: Vec<ScanResult> = images
        .iter()
        .map(|path| {
            let outcome = image::open(path)
                .with_context(|| format!("Failed to open image {:?}", path))
                .and_then(|img| reader.read(&img.to_rgb8()));
            match outcome {
                Ok(plate) => ScanResult {
                    image: path.clone(),
                    plate,
                    error: None,
                },
                Err(e) => ScanResult {
                    image: path.clone(),
                    plate: None,
                    error: Some(format!("{:#}", e)),
                },
            }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    for result in &results {
        match (&result.plate, &result.error) {
            (Some(accepted), _) => println!(
                "{}: {} at {}",
                result.image.display(),
                accepted.plate,
                accepted.bbox
            ),
            (None, Some(error)) => println!("{}: error: {}", result.image.display(), error),
            (None, None) => println!("{}: no plate", result.image.display()),
        }
    }
    Ok(())
}

fn run_lane(config: &AppConfig, data_dir: &Path, operator: &Operator, dir: &Path, fps: u32) -> Result<()> {
    let reader = build_reader(config, data_dir)?;
    let toll = Arc::new(build_toll(config, data_dir, operator)?);
    let session = LaneSession::new(reader, toll, config.lane.detect_every_n_frames);
    let worker = LaneWorker::spawn(session)?;

    let mut source = DirectorySource::open(dir)?;
    let interval = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));

    info!(
        "Lane {} running, analysing every {} frames",
        operator.lane_id, config.lane.detect_every_n_frames
    );

    let mut dropped = 0usize;
    while let Some(frame) = source.next_frame()? {
        if !worker.submit(frame) {
            dropped += 1;
        }
        for event in worker.events().try_iter() {
            print_event(&event);
        }
        std::thread::sleep(interval);
    }

    for event in worker.finish() {
        print_event(&event);
    }
    info!("Replay finished, {} frames dropped while busy", dropped);
    Ok(())
}

fn print_event(event: &LaneEvent) {
    match event {
        LaneEvent::Toll { sequence, outcome } => println!("[frame {}] {}", sequence, outcome),
        LaneEvent::Duplicate { sequence, plate } => {
            println!("[frame {}] {}: already processed", sequence, plate)
        }
        LaneEvent::Failed { sequence, message } => println!("[frame {}] error: {}", sequence, message),
    }
}

fn charge(
    config: &AppConfig,
    data_dir: &Path,
    operator: &Operator,
    plate: String,
    class: VehicleClass,
    amount: Option<f64>,
    without_tag: bool,
) -> Result<()> {
    let toll = build_toll(config, data_dir, operator)?;
    let amount = amount.unwrap_or_else(|| toll.fares().fare(class));

    let receipt = toll.manual_transaction(&ManualTransaction {
        plate,
        vehicle_class: class,
        amount,
        proceed_without_tag: without_tag,
    })?;

    println!(
        "Recorded {} ({}) amount {:.2}, tag {}, {} [entry {}]",
        receipt.plate,
        receipt.vehicle_class,
        receipt.amount,
        receipt.tag_status,
        if receipt.debited { "debited" } else { "not debited" },
        receipt.entry_id
    );
    Ok(())
}

fn manage_users(config: &AppConfig, data_dir: &Path, action: UserCommand) -> Result<()> {
    match action {
        UserCommand::Add {
            login,
            username,
            new_password,
            lane,
        } => {
            sign_in(config, data_dir, &login)?;
            let users = open_user_store(config, data_dir)?;
            if !users.add_user(&username, &new_password, &lane)? {
                anyhow::bail!("Operator {} already exists", username.trim());
            }
            println!("Added operator {} on lane {}", username.trim(), lane.trim());
        }
        UserCommand::List => {
            for operator in open_user_store(config, data_dir)?.list()? {
                println!("{:<16} lane {}", operator.username, operator.lane_id);
            }
        }
    }
    Ok(())
}

fn show_logs(config: &AppConfig, data_dir: &Path, limit: usize) -> Result<()> {
    let audit = open_audit_log(config, data_dir)?;
    let rows = audit.recent(limit)?;

    if rows.is_empty() {
        println!("No vehicles logged");
        return Ok(());
    }

    println!(
        "{:>5}  {:<12} {:<8} {:<8} {:<12} {:<8} {}",
        "ID", "PLATE", "CLASS", "TAG", "OPERATOR", "LANE", "TIME"
    );
    for row in rows {
        println!(
            "{:>5}  {:<12} {:<8} {:<8} {:<12} {:<8} {}",
            row.id, row.plate, row.vehicle_type, row.tag_status, row.operator, row.lane_id, row.timestamp
        );
    }
    Ok(())
}

fn show_models(config: &AppConfig, data_dir: &Path) -> Result<()> {
    let models = model_manager(config, data_dir);
    println!("Models directory: {}", models.models_dir().display());

    for (model_type, available, size) in models.get_model_status() {
        let status = match (available, size) {
            (true, Some(bytes)) => format!("ok ({} KB)", bytes / 1024),
            _ => "missing".to_string(),
        };
        println!(
            "  {:<22} {:<24} {}",
            model_type.display_name(),
            models
                .model_path(model_type)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            status
        );
    }

    if models.are_models_ready() {
        println!("All models ready");
    } else {
        println!("Some models are missing; scan and run need all three files");
    }
    Ok(())
}

fn show_config(config: &AppConfig, path: &Path, write: bool) -> Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    if write {
        config::save_config(config, path)?;
        info!("Configuration written to {:?}", path);
    }
    Ok(())
}
