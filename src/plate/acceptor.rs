//! Per-frame plate acceptance
//!
//! Walks the detector output in order, skips low confidence boxes, reads
//! each remaining region twice (grayscale, then Otsu binary) and returns the
//! first OCR candidate that clears the confidence threshold and the plate
//! format. There is no ranking: the first acceptable reading wins, which
//! decides what is reported when the two variants disagree.

use image::{GrayImage, RgbImage};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::{normalize, PlateString, MIN_DETECTION_CONFIDENCE, MIN_OCR_CONFIDENCE};
use crate::vision::preprocess::region_variants;
use crate::vision::{BoundingBox, Detection, OcrCandidate, TextRecognizer};

/// Caller contract violations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcceptError {
    #[error("detection box {bbox} is empty")]
    EmptyBox { bbox: BoundingBox },

    #[error("detection box {bbox} exceeds frame bounds {width}x{height}")]
    BoxOutOfBounds {
        bbox: BoundingBox,
        width: u32,
        height: u32,
    },
}

/// A plate accepted for this frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedPlate {
    pub plate: PlateString,
    /// Box of the detection the plate was read from
    pub bbox: BoundingBox,
}

/// Which OCR pass produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Grayscale,
    Binary,
}

/// Picks at most one plate per frame from detector and OCR output
#[derive(Debug, Clone, Copy, Default)]
pub struct PlateAcceptor;

impl PlateAcceptor {
    pub fn new() -> Self {
        Self
    }

    /// Run the acceptance chain over one frame's detections
    ///
    /// `Ok(None)` means no plate was accepted this frame; the caller simply
    /// tries again on a later frame. Recognizer failures are logged and
    /// count as an empty reading. Errors are only returned for boxes that
    /// are empty or reach outside the frame.
    pub fn accept<R>(
        &self,
        frame: &RgbImage,
        detections: &[Detection],
        recognizer: &R,
    ) -> Result<Option<AcceptedPlate>, AcceptError>
    where
        R: TextRecognizer + ?Sized,
    {
        let (width, height) = frame.dimensions();

        for detection in detections {
            if detection.confidence < MIN_DETECTION_CONFIDENCE {
                trace!("Skipping detection {} at {:.2}", detection.bbox, detection.confidence);
                continue;
            }

            let bbox = detection.bbox;
            if bbox.is_empty() {
                return Err(AcceptError::EmptyBox { bbox });
            }
            if !bbox.fits_within(width, height) {
                return Err(AcceptError::BoxOutOfBounds { bbox, width, height });
            }

            let variants = region_variants(frame, &bbox);
            let candidates = read(recognizer, &variants.gray, Variant::Grayscale)
                .into_iter()
                .chain(read(recognizer, &variants.binary, Variant::Binary));

            for candidate in candidates {
                if candidate.confidence <= MIN_OCR_CONFIDENCE {
                    continue;
                }
                match PlateString::parse(&candidate.text) {
                    Some(plate) => {
                        debug!("Accepted plate {} from {}", plate, bbox);
                        return Ok(Some(AcceptedPlate { plate, bbox }));
                    }
                    None => debug!(
                        "Rejected OCR reading '{}' ({:.2})",
                        normalize(&candidate.text),
                        candidate.confidence
                    ),
                }
            }
        }

        Ok(None)
    }
}

fn read<R>(recognizer: &R, region: &GrayImage, variant: Variant) -> Vec<OcrCandidate>
where
    R: TextRecognizer + ?Sized,
{
    match recognizer.recognize(region) {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!("Text recognition failed on {:?} region: {:#}", variant, e);
            vec![]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use image::Rgb;
    use parking_lot::Mutex;

    /// Replays scripted readings in call order and records each call's region size
    struct ScriptedRecognizer {
        script: Mutex<Vec<Vec<OcrCandidate>>>,
        calls: Mutex<Vec<(u32, u32)>>,
    }

    impl ScriptedRecognizer {
        fn new(script: Vec<Vec<OcrCandidate>>) -> Self {
            let mut script = script;
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn recognize(&self, region: &GrayImage) -> Result<Vec<OcrCandidate>> {
            self.calls.lock().push(region.dimensions());
            Ok(self.script.lock().pop().unwrap_or_default())
        }
    }

    fn frame() -> RgbImage {
        RgbImage::from_fn(200, 100, |x, _| if x % 7 < 3 { Rgb([20, 20, 20]) } else { Rgb([230, 230, 230]) })
    }

    fn detection(x1: u32, confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(x1, 10, x1 + 60, 40), confidence)
    }

    fn reading(text: &str, confidence: f32) -> OcrCandidate {
        OcrCandidate::new(text, confidence)
    }

    #[test]
    fn test_end_to_end_single_detection() {
        let recognizer = ScriptedRecognizer::new(vec![vec![reading("dl 1 ab 1234", 0.85)], vec![]]);
        let result = PlateAcceptor::new()
            .accept(&frame(), &[detection(10, 0.6)], &recognizer)
            .unwrap()
            .unwrap();

        assert_eq!(result.plate.as_str(), "DL1AB1234");
        assert_eq!(result.bbox, BoundingBox::new(10, 10, 70, 40));
        // Grayscale pass matched, the binary variant was still read
        assert_eq!(recognizer.call_count(), 2);
    }

    #[test]
    fn test_three_letter_series_reading_is_not_accepted() {
        let recognizer = ScriptedRecognizer::new(vec![vec![reading("dl 1 abc 1234", 0.85)], vec![]]);
        let result = PlateAcceptor::new()
            .accept(&frame(), &[detection(10, 0.6)], &recognizer)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_detection_confidence_boundary() {
        let recognizer = |_: &GrayImage| -> Result<Vec<OcrCandidate>> { Ok(vec![reading("UP32GH5678", 0.9)]) };
        let acceptor = PlateAcceptor::new();

        let skipped = acceptor.accept(&frame(), &[detection(10, 0.39)], &recognizer).unwrap();
        assert!(skipped.is_none());

        let considered = acceptor.accept(&frame(), &[detection(10, 0.4)], &recognizer).unwrap();
        assert_eq!(considered.unwrap().plate.as_str(), "UP32GH5678");
    }

    #[test]
    fn test_low_confidence_detection_never_reaches_recognizer() {
        let recognizer = ScriptedRecognizer::new(vec![]);
        let result = PlateAcceptor::new()
            .accept(&frame(), &[detection(10, 0.2), detection(80, 0.1)], &recognizer)
            .unwrap();
        assert!(result.is_none());
        assert_eq!(recognizer.call_count(), 0);
    }

    #[test]
    fn test_ocr_confidence_is_strict() {
        let at_threshold = |_: &GrayImage| -> Result<Vec<OcrCandidate>> { Ok(vec![reading("MH12XY4321", 0.7)]) };
        let above = |_: &GrayImage| -> Result<Vec<OcrCandidate>> { Ok(vec![reading("MH12XY4321", 0.71)]) };
        let acceptor = PlateAcceptor::new();

        assert!(acceptor.accept(&frame(), &[detection(10, 0.9)], &at_threshold).unwrap().is_none());
        assert!(acceptor.accept(&frame(), &[detection(10, 0.9)], &above).unwrap().is_some());
    }

    #[test]
    fn test_second_detection_wins_when_first_fails_format() {
        let recognizer = ScriptedRecognizer::new(vec![
            vec![reading("HELLO WORLD", 0.95)],
            vec![reading("MH1XY123", 0.92)],
            vec![reading("ka 05 mn 2024", 0.8)],
            vec![],
        ]);
        let result = PlateAcceptor::new()
            .accept(&frame(), &[detection(10, 0.9), detection(120, 0.5)], &recognizer)
            .unwrap()
            .unwrap();

        assert_eq!(result.plate.as_str(), "KA05MN2024");
        assert_eq!(result.bbox.x1, 120);
    }

    #[test]
    fn test_first_valid_candidate_wins() {
        // Grayscale reading is valid, the binary pass disagrees
        let recognizer = ScriptedRecognizer::new(vec![
            vec![reading("garbage", 0.99), reading("TN09B0001", 0.75), reading("TN09B0007", 0.98)],
            vec![reading("TN09B0008", 0.99)],
            vec![reading("KA05MN2024", 0.99)],
            vec![],
        ]);
        let result = PlateAcceptor::new()
            .accept(&frame(), &[detection(10, 0.9), detection(120, 0.9)], &recognizer)
            .unwrap()
            .unwrap();

        assert_eq!(result.plate.as_str(), "TN09B0001");
        assert_eq!(result.bbox.x1, 10);
    }

    #[test]
    fn test_binary_variant_read_after_grayscale() {
        let recognizer = ScriptedRecognizer::new(vec![vec![reading("??", 0.9)], vec![reading("GJ1CD4455", 0.9)]]);
        let result = PlateAcceptor::new()
            .accept(&frame(), &[detection(10, 0.9)], &recognizer)
            .unwrap()
            .unwrap();

        assert_eq!(result.plate.as_str(), "GJ1CD4455");
        assert_eq!(*recognizer.calls.lock(), vec![(60, 30), (60, 30)]);
    }

    #[test]
    fn test_idempotent() {
        let recognizer = |region: &GrayImage| -> Result<Vec<OcrCandidate>> {
            // Only the binary variant is purely black and white
            let binary = region.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255);
            Ok(if binary { vec![reading("RJ14CV0002", 0.9)] } else { vec![reading("noise", 0.9)] })
        };
        let detections = [detection(10, 0.3), detection(40, 0.8)];
        let acceptor = PlateAcceptor::new();

        let first = acceptor.accept(&frame(), &detections, &recognizer).unwrap();
        let second = acceptor.accept(&frame(), &detections, &recognizer).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.unwrap().plate.as_str(), "RJ14CV0002");
    }

    #[test]
    fn test_no_detections() {
        let recognizer = ScriptedRecognizer::new(vec![]);
        assert!(PlateAcceptor::new().accept(&frame(), &[], &recognizer).unwrap().is_none());
    }

    #[test]
    fn test_length_window_and_whitespace() {
        let recognizer = |_: &GrayImage| -> Result<Vec<OcrCandidate>> {
            Ok(vec![reading("  ", 0.99), reading("a b 1 c d 1 2 3 4", 0.9)])
        };
        let result = PlateAcceptor::new()
            .accept(&frame(), &[detection(10, 0.9)], &recognizer)
            .unwrap()
            .unwrap();
        assert_eq!(result.plate.as_str(), "AB1CD1234");
    }

    #[test]
    fn test_recognizer_failure_is_not_propagated() {
        let recognizer = |_: &GrayImage| -> Result<Vec<OcrCandidate>> { anyhow::bail!("engine crashed") };
        let result = PlateAcceptor::new().accept(&frame(), &[detection(10, 0.9)], &recognizer);
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn test_box_outside_frame_is_contract_violation() {
        let recognizer = ScriptedRecognizer::new(vec![]);
        let outside = Detection::new(BoundingBox::new(150, 10, 260, 40), 0.9);
        let err = PlateAcceptor::new().accept(&frame(), &[outside], &recognizer).unwrap_err();

        assert_eq!(
            err,
            AcceptError::BoxOutOfBounds {
                bbox: outside.bbox,
                width: 200,
                height: 100
            }
        );
        assert_eq!(recognizer.call_count(), 0);
    }

    #[test]
    fn test_empty_box_is_contract_violation() {
        let recognizer = ScriptedRecognizer::new(vec![]);
        let empty = Detection::new(BoundingBox::new(50, 10, 50, 40), 0.9);
        let err = PlateAcceptor::new().accept(&frame(), &[empty], &recognizer).unwrap_err();
        assert_eq!(err, AcceptError::EmptyBox { bbox: empty.bbox });
    }

    #[test]
    fn test_invalid_box_below_threshold_is_ignored() {
        let recognizer = ScriptedRecognizer::new(vec![]);
        let outside = Detection::new(BoundingBox::new(150, 10, 260, 40), 0.1);
        assert!(PlateAcceptor::new().accept(&frame(), &[outside], &recognizer).unwrap().is_none());
    }
}
