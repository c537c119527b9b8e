//! Lane Coordinator
//!
//! Runs the plate pipeline on sampled lane frames and charges accepted
//! plates. Frames are handed to a background worker that drops new frames
//! while it is still busy, so a slow model never backs up the camera.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

use crate::capture::CapturedFrame;
use crate::plate::{AcceptedPlate, PlateAcceptor, PlateString};
use crate::toll::{TollOutcome, TollService};
use crate::vision::{Detector, TextRecognizer};

/// Detector, recognizer and acceptor bundled for single-image reads
pub struct PlateReader {
    detector: Arc<dyn Detector>,
    recognizer: Arc<dyn TextRecognizer>,
    acceptor: PlateAcceptor,
}

impl PlateReader {
    pub fn new(detector: Arc<dyn Detector>, recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self {
            detector,
            recognizer,
            acceptor: PlateAcceptor::new(),
        }
    }

    /// Detect plate regions and accept the first valid reading
    pub fn read(&self, image: &RgbImage) -> Result<Option<AcceptedPlate>> {
        let detections = self.detector.detect(image).context("Plate detection failed")?;
        debug!("{} plate candidates", detections.len());

        let accepted = self
            .acceptor
            .accept(image, &detections, self.recognizer.as_ref())?;
        Ok(accepted)
    }
}

/// Something that happened on the lane
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum LaneEvent {
    /// A new plate was read and the toll service ran
    Toll { sequence: u64, outcome: TollOutcome },
    /// The same plate as the previous one was read again
    Duplicate { sequence: u64, plate: String },
    /// The frame could not be processed
    Failed { sequence: u64, message: String },
}

/// Per-lane frame processing state
pub struct LaneSession {
    reader: PlateReader,
    toll: Arc<TollService>,
    detect_every_n_frames: u64,
    frames_seen: u64,
    last_plate: Option<PlateString>,
}

impl LaneSession {
    pub fn new(reader: PlateReader, toll: Arc<TollService>, detect_every_n_frames: u32) -> Self {
        Self {
            reader,
            toll,
            detect_every_n_frames: u64::from(detect_every_n_frames.max(1)),
            frames_seen: 0,
            last_plate: None,
        }
    }

    /// Process one frame
    ///
    /// Only every N-th frame is analysed. Returns `None` for skipped frames
    /// and frames without an accepted plate.
    pub fn process_frame(&mut self, frame: &CapturedFrame) -> Option<LaneEvent> {
        self.frames_seen += 1;
        if self.frames_seen % self.detect_every_n_frames != 0 {
            return None;
        }

        let sequence = frame.sequence;
        let accepted = match self.reader.read(&frame.image) {
            Ok(Some(accepted)) => accepted,
            Ok(None) => return None,
            Err(e) => {
                error!("Frame {} skipped: {:#}", sequence, e);
                return Some(LaneEvent::Failed {
                    sequence,
                    message: format!("{:#}", e),
                });
            }
        };

        if self.last_plate.as_ref() == Some(&accepted.plate) {
            debug!("Ignoring repeat read of {}", accepted.plate);
            return Some(LaneEvent::Duplicate {
                sequence,
                plate: accepted.plate.to_string(),
            });
        }

        info!("Plate {} read at {}", accepted.plate, accepted.bbox);

        // A plate whose toll failed stays eligible for the next frame
        match self.toll.auto_deduct(&accepted.plate, &frame.image) {
            Ok(outcome) => {
                self.last_plate = Some(accepted.plate);
                Some(LaneEvent::Toll { sequence, outcome })
            }
            Err(e) => {
                error!("Toll for {} failed: {:#}", accepted.plate, e);
                Some(LaneEvent::Failed {
                    sequence,
                    message: format!("{:#}", e),
                })
            }
        }
    }
}

/// Messages to the lane worker
enum WorkerMessage {
    Frame(CapturedFrame),
    Shutdown,
}

/// Background thread running a lane session
pub struct LaneWorker {
    /// Single-slot frame queue
    frames: Sender<WorkerMessage>,
    /// Events reported by the worker
    events: Receiver<LaneEvent>,
    /// Handle to worker thread
    handle: Option<JoinHandle<()>>,
}

impl LaneWorker {
    /// Start the worker thread
    pub fn spawn(mut session: LaneSession) -> Result<Self> {
        let (frames, frame_rx) = bounded::<WorkerMessage>(1);
        let (event_tx, events) = unbounded();

        let handle = std::thread::Builder::new()
            .name("lane-worker".to_string())
            .spawn(move || {
                info!("Lane worker starting...");
                for message in frame_rx.iter() {
                    let frame = match message {
                        WorkerMessage::Frame(frame) => frame,
                        WorkerMessage::Shutdown => break,
                    };
                    let event = session.process_frame(&frame);
                    debug!(
                        "Frame {} done {:?} after capture",
                        frame.sequence,
                        frame.timestamp.elapsed()
                    );
                    if let Some(event) = event {
                        if event_tx.send(event).is_err() {
                            break;
                        }
                    }
                }
                info!("Lane worker exiting...");
            })
            .context("Failed to spawn lane worker")?;

        Ok(Self {
            frames,
            events,
            handle: Some(handle),
        })
    }

    /// Offer a frame to the worker without blocking
    ///
    /// Returns false when the frame was dropped because the worker is busy.
    pub fn submit(&self, frame: CapturedFrame) -> bool {
        match self.frames.try_send(WorkerMessage::Frame(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(WorkerMessage::Frame(frame))) => {
                debug!("Worker busy, dropping frame {}", frame.sequence);
                false
            }
            Err(_) => false,
        }
    }

    /// Events reported so far
    pub fn events(&self) -> &Receiver<LaneEvent> {
        &self.events
    }

    /// Stop the worker after it drains queued frames and return the
    /// events it has not reported yet
    pub fn finish(mut self) -> Vec<LaneEvent> {
        self.stop();
        self.events.try_iter().collect()
    }

    fn stop(&mut self) {
        // Signal worker to stop
        let _ = self.frames.send(WorkerMessage::Shutdown);

        // Wait for worker thread to finish
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Lane worker panicked");
            }
        }
    }
}

impl Drop for LaneWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InMemoryTagLedger, TagLedger, TagRecord, TagStatus};
    use crate::storage::{AuditEntry, AuditLog, SqliteAuditLog};
    use crate::toll::{FareSchedule, VehicleClass};
    use crate::vision::{BoundingBox, Detection, OcrCandidate};
    use image::GrayImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Detector that reports one plate region and counts its calls
    #[derive(Default)]
    struct FixedDetector {
        calls: AtomicUsize,
    }

    impl Detector for FixedDetector {
        fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Detection::new(BoundingBox::new(8, 8, 56, 24), 0.9)])
        }
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>> {
            anyhow::bail!("inference backend unavailable")
        }
    }

    /// Detector that blocks until the test releases it
    struct GatedDetector {
        entered: Sender<()>,
        gate: Receiver<()>,
    }

    impl Detector for GatedDetector {
        fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>> {
            let _ = self.entered.send(());
            let _ = self.gate.recv();
            Ok(vec![])
        }
    }

    /// Audit log whose storage is unavailable
    struct FailingAudit;

    impl AuditLog for FailingAudit {
        fn append(&self, _entry: &AuditEntry) -> Result<i64> {
            anyhow::bail!("disk I/O error")
        }
    }

    fn reads(text: &'static str) -> Arc<dyn TextRecognizer> {
        Arc::new(move |_: &GrayImage| -> Result<Vec<OcrCandidate>> {
            Ok(vec![OcrCandidate::new(text, 0.92)])
        })
    }

    struct Lane {
        _dir: TempDir,
        ledger: Arc<InMemoryTagLedger>,
        audit: Arc<SqliteAuditLog>,
        toll: Arc<TollService>,
    }

    fn lane() -> Lane {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(InMemoryTagLedger::with_records([(
            "DL1AB1234".to_string(),
            TagRecord {
                status: TagStatus::Valid,
                tag_id: Some("FT12345".to_string()),
                balance: 280.5,
                vehicle_class: VehicleClass::Car,
            },
        )]));
        let audit = Arc::new(SqliteAuditLog::open(&dir.path().join("logs.db")).unwrap());
        let toll = Arc::new(TollService::new(
            ledger.clone(),
            audit.clone(),
            FareSchedule::default(),
            "Asha",
            "LANE-1",
        ));
        Lane {
            _dir: dir,
            ledger,
            audit,
            toll,
        }
    }

    fn frame(sequence: u64) -> CapturedFrame {
        CapturedFrame::new(RgbImage::from_pixel(64, 32, image::Rgb([180, 180, 180])), sequence)
    }

    #[test]
    fn test_reader_accepts_plate() {
        let reader = PlateReader::new(Arc::new(FixedDetector::default()), reads("DL 1 AB 1234"));
        let accepted = reader.read(&frame(1).image).unwrap().unwrap();
        assert_eq!(accepted.plate.as_str(), "DL1AB1234");
        assert_eq!(accepted.bbox, BoundingBox::new(8, 8, 56, 24));
    }

    #[test]
    fn test_session_samples_every_nth_frame() {
        let lane = lane();
        let detector = Arc::new(FixedDetector::default());
        let reader = PlateReader::new(detector.clone(), reads("KA05MN2024"));
        let mut session = LaneSession::new(reader, lane.toll.clone(), 3);

        let events: Vec<Option<LaneEvent>> = (1..=7).map(|i| session.process_frame(&frame(i))).collect();

        // Frames 3 and 6 are analysed
        assert_eq!(detector.calls.load(Ordering::SeqCst), 2);
        assert!(events[0].is_none() && events[1].is_none());
        assert!(matches!(
            events[2],
            Some(LaneEvent::Toll {
                sequence: 3,
                outcome: TollOutcome::NoTag { .. }
            })
        ));
        assert!(matches!(events[5], Some(LaneEvent::Duplicate { sequence: 6, .. })));
        assert!(events[6].is_none());
    }

    #[test]
    fn test_session_charges_once_per_plate() {
        let lane = lane();
        let reader = PlateReader::new(Arc::new(FixedDetector::default()), reads("DL1AB1234"));
        let mut session = LaneSession::new(reader, lane.toll.clone(), 1);

        let first = session.process_frame(&frame(1)).unwrap();
        let LaneEvent::Toll { outcome, .. } = &first else {
            panic!("expected a toll event, got {:?}", first);
        };
        assert!(matches!(outcome, TollOutcome::Charged { fare, .. } if *fare == 60.0));

        for i in 2..=4 {
            assert!(matches!(
                session.process_frame(&frame(i)),
                Some(LaneEvent::Duplicate { .. })
            ));
        }

        assert!((lane.ledger.lookup("DL1AB1234").balance - 220.5).abs() < 1e-9);
        assert_eq!(lane.audit.recent(10).unwrap().len(), 1);
        assert_eq!(session.last_plate.as_ref().map(|p| p.as_str()), Some("DL1AB1234"));
    }

    #[test]
    fn test_session_no_plate_keeps_last() {
        let lane = lane();
        let reader = PlateReader::new(Arc::new(FixedDetector::default()), reads("MH1XY123"));
        let mut session = LaneSession::new(reader, lane.toll.clone(), 1);

        assert!(session.process_frame(&frame(1)).is_none());
        assert!(session.last_plate.is_none());
    }

    #[test]
    fn test_session_detector_failure_skips_frame() {
        let lane = lane();
        let reader = PlateReader::new(Arc::new(FailingDetector), reads("DL1AB1234"));
        let mut session = LaneSession::new(reader, lane.toll.clone(), 1);

        let event = session.process_frame(&frame(1)).unwrap();
        let LaneEvent::Failed { sequence, message } = event else {
            panic!("expected a failure event");
        };
        assert_eq!(sequence, 1);
        assert!(message.contains("inference backend unavailable"));
        assert!(lane.audit.recent(10).unwrap().is_empty());
    }

    #[test]
    fn test_session_retries_plate_after_toll_failure() {
        let lane = lane();
        let toll = Arc::new(TollService::new(
            lane.ledger.clone(),
            Arc::new(FailingAudit),
            FareSchedule::default(),
            "Asha",
            "LANE-1",
        ));
        let reader = PlateReader::new(Arc::new(FixedDetector::default()), reads("DL1AB1234"));
        let mut session = LaneSession::new(reader, toll, 1);

        for i in 1..=2 {
            let event = session.process_frame(&frame(i)).unwrap();
            let LaneEvent::Failed { sequence, message } = event else {
                panic!("expected a failure event");
            };
            assert_eq!(sequence, i);
            assert!(message.contains("disk I/O error"));
        }

        assert!(session.last_plate.is_none());
        assert!((lane.ledger.lookup("DL1AB1234").balance - 280.5).abs() < 1e-9);
    }

    #[test]
    fn test_session_zero_interval_processes_every_frame() {
        let lane = lane();
        let detector = Arc::new(FixedDetector::default());
        let reader = PlateReader::new(detector.clone(), reads("DL1AB1234"));
        let mut session = LaneSession::new(reader, lane.toll.clone(), 0);

        session.process_frame(&frame(1));
        session.process_frame(&frame(2));
        assert_eq!(detector.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_worker_reports_events() {
        let lane = lane();
        let reader = PlateReader::new(Arc::new(FixedDetector::default()), reads("DL1AB1234"));
        let worker = LaneWorker::spawn(LaneSession::new(reader, lane.toll.clone(), 1)).unwrap();

        assert!(worker.submit(frame(1)));
        let event = worker.events().recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, LaneEvent::Toll { sequence: 1, .. }));

        assert!(worker.submit(frame(2)));
        let remaining = worker.finish();
        assert!(matches!(remaining.as_slice(), [LaneEvent::Duplicate { sequence: 2, .. }]));
    }

    #[test]
    fn test_worker_drops_frames_while_busy() {
        let lane = lane();
        let (entered_tx, entered_rx) = unbounded();
        let (gate_tx, gate_rx) = unbounded::<()>();
        let detector = GatedDetector {
            entered: entered_tx,
            gate: gate_rx,
        };
        let reader = PlateReader::new(Arc::new(detector), reads("DL1AB1234"));
        let worker = LaneWorker::spawn(LaneSession::new(reader, lane.toll.clone(), 1)).unwrap();

        assert!(worker.submit(frame(1)));
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Worker is blocked on frame 1: one frame fits in the slot
        assert!(worker.submit(frame(2)));
        assert!(!worker.submit(frame(3)));

        // Release the detector and shut down
        drop(gate_tx);
        let remaining = worker.finish();
        assert!(remaining.is_empty());
        assert_eq!(entered_rx.try_iter().count(), 1);
    }
}
