//! Vision Layer
//!
//! Plate detection and text recognition on captured frames.
//! Both capabilities are traits so the acceptance pipeline can run against
//! the ONNX Runtime backends or any other implementation:
//! - `OnnxPlateDetector` (YOLO-style single class detector)
//! - `OnnxTextRecognizer` (CRNN line recognizer with CTC decoding)

pub mod detection;
pub mod models;
pub mod ocr;
pub mod preprocess;

use anyhow::Result;
use image::{GrayImage, RgbImage};
use serde::Serialize;

pub use detection::{DetectorConfig, OnnxPlateDetector};
pub use models::{ModelManager, ModelType};
pub use ocr::{OnnxTextRecognizer, RecognizerConfig};

/// Axis-aligned pixel rectangle, corners (x1, y1) inclusive and (x2, y2) exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    /// True when the box has no pixels
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// True when the whole box lies inside an image of the given size
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x2 <= width && self.y2 <= height
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}

/// Candidate plate region produced by a detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    /// Region in frame pixels
    pub bbox: BoundingBox,
    /// Detection confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self { bbox, confidence }
    }
}

/// Text read from an image region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrCandidate {
    /// Raw recognized text
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl OcrCandidate {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Finds candidate plate regions in a frame
pub trait Detector: Send + Sync {
    /// Boxes must lie within the frame; confidences in [0, 1]
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>>;
}

/// Reads text from a single-channel image region
pub trait TextRecognizer: Send + Sync {
    /// May return an empty list
    fn recognize(&self, region: &GrayImage) -> Result<Vec<OcrCandidate>>;
}

impl<F> TextRecognizer for F
where
    F: Fn(&GrayImage) -> Result<Vec<OcrCandidate>> + Send + Sync,
{
    fn recognize(&self, region: &GrayImage) -> Result<Vec<OcrCandidate>> {
        self(region)
    }
}
