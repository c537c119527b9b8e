//! License plate detection
//!
//! YOLO-style single class detector run through ONNX Runtime. Frames are
//! letterboxed to a square input, predictions are decoded into frame pixel
//! boxes, filtered by confidence and deduplicated with non-maximum suppression.

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::debug;

use super::models::{ModelError, OnnxSession};
use super::preprocess::{letterbox, rgb_to_nchw, Letterbox};
use super::{BoundingBox, Detection, Detector};

/// Configuration for the plate detector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Square model input size in pixels
    pub input_size: u32,
    /// Predictions below this confidence are dropped before NMS
    pub confidence_threshold: f32,
    /// Overlap above which the weaker of two boxes is suppressed
    pub iou_threshold: f32,
    /// Maximum number of detections returned per frame
    pub max_detections: usize,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            max_detections: 20,
            intra_threads: 4,
        }
    }
}

/// Plate detector backed by an ONNX model
pub struct OnnxPlateDetector {
    session: OnnxSession,
    config: DetectorConfig,
}

impl OnnxPlateDetector {
    /// Load the detector model
    pub fn new(model_path: &Path, config: DetectorConfig) -> Result<Self> {
        let session = OnnxSession::new(model_path, config.intra_threads)?;
        Ok(Self { session, config })
    }
}

impl Detector for OnnxPlateDetector {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let start = Instant::now();

        let (input, geometry) = letterbox(frame, self.config.input_size);
        let tensor = rgb_to_nchw(&input);

        let detections = self.session.run(&tensor, |shape, data| {
            decode_predictions(shape, data, &geometry, frame.dimensions(), &self.config)
        })?;

        debug!(
            "Plate detection complete in {:?}: {} boxes",
            start.elapsed(),
            detections.len()
        );

        Ok(detections)
    }
}

/// A decoded prediction in frame coordinates, before integer conversion
#[derive(Debug, Clone, Copy)]
struct RawBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
}

impl RawBox {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &RawBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// Decode a `[1, 4 + classes, anchors]` (or transposed) prediction tensor
fn decode_predictions(
    shape: &[i64],
    data: &[f32],
    geometry: &Letterbox,
    (frame_w, frame_h): (u32, u32),
    config: &DetectorConfig,
) -> Result<Vec<Detection>> {
    let unexpected = || ModelError::UnexpectedShape {
        output: "detector".to_string(),
        shape: shape.to_vec(),
    };

    let &[1, d1, d2] = shape else {
        return Err(unexpected().into());
    };
    if d1 <= 0 || d2 <= 0 {
        return Err(unexpected().into());
    }
    let (d1, d2) = (d1 as usize, d2 as usize);
    if d1 * d2 != data.len() {
        return Err(unexpected().into());
    }

    // Anchors always outnumber the per-anchor attributes
    let (attributes, anchors, channels_first) = if d1 <= d2 { (d1, d2, true) } else { (d2, d1, false) };
    if attributes < 5 {
        return Err(unexpected().into());
    }

    let value = |anchor: usize, attribute: usize| -> f32 {
        if channels_first {
            data[attribute * anchors + anchor]
        } else {
            data[anchor * attributes + attribute]
        }
    };

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let confidence = (4..attributes)
            .map(|a| value(anchor, a))
            .fold(f32::NEG_INFINITY, f32::max);

        if confidence < config.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (value(anchor, 0), value(anchor, 1), value(anchor, 2), value(anchor, 3));
        let (x1, y1) = geometry.to_source(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = geometry.to_source(cx + w / 2.0, cy + h / 2.0);

        candidates.push(RawBox {
            x1: x1.clamp(0.0, frame_w as f32),
            y1: y1.clamp(0.0, frame_h as f32),
            x2: x2.clamp(0.0, frame_w as f32),
            y2: y2.clamp(0.0, frame_h as f32),
            confidence: confidence.clamp(0.0, 1.0),
        });
    }

    let kept = non_maximum_suppression(candidates, config.iou_threshold);

    Ok(kept
        .into_iter()
        .map(|b| {
            Detection::new(
                BoundingBox::new(b.x1 as u32, b.y1 as u32, b.x2 as u32, b.y2 as u32),
                b.confidence,
            )
        })
        .filter(|d| !d.bbox.is_empty())
        .take(config.max_detections)
        .collect())
}

/// Greedy non-maximum suppression, highest confidence first
fn non_maximum_suppression(mut boxes: Vec<RawBox>, iou_threshold: f32) -> Vec<RawBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut result: Vec<RawBox> = Vec::new();
    for candidate in boxes {
        let dominated = result
            .iter()
            .any(|existing| existing.iou(&candidate) > iou_threshold);
        if !dominated {
            result.push(candidate);
        }
    }

    result
}
