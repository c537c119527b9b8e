//! OCR (Optical Character Recognition) module
//!
//! Line recognition with a CRNN model via ONNX Runtime. The model emits a
//! probability distribution over the character table per time step, which
//! is collapsed into text with greedy CTC decoding.

use anyhow::{Context, Result};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::models::{ModelError, OnnxSession};
use super::preprocess::gray_to_recognition_tensor;
use super::{OcrCandidate, TextRecognizer};

/// Index reserved for the CTC blank token
const BLANK_INDEX: usize = 0;

/// Configuration for the text recognizer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Model input height in pixels
    pub input_height: u32,
    /// Maximum model input width in pixels
    pub max_width: u32,
    /// Append a space to the character table
    pub use_space_char: bool,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            input_height: 48,
            max_width: 320,
            use_space_char: true,
            intra_threads: 2,
        }
    }
}

/// Greedy CTC decoder over a character table
#[derive(Debug, Clone)]
pub struct CtcDecoder {
    /// Characters for indices 1.. (index 0 is blank)
    characters: Vec<char>,
}

impl CtcDecoder {
    /// Build a decoder from the dictionary characters in model order
    pub fn new(mut characters: Vec<char>, use_space_char: bool) -> Self {
        if use_space_char {
            characters.push(' ');
        }
        Self { characters }
    }

    /// Build a decoder from a dictionary file with one character per line
    pub fn from_dictionary_file(path: &Path, use_space_char: bool) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read character dictionary {:?}", path))?;
        let characters = content
            .lines()
            .filter_map(|line| line.trim_end_matches('\r').chars().next())
            .collect();
        Ok(Self::new(characters, use_space_char))
    }

    /// Number of classes the model must emit (blank + characters)
    pub fn num_classes(&self) -> usize {
        self.characters.len() + 1
    }

    /// Decode `steps` x `classes` probabilities into text and mean confidence
    ///
    /// Returns `None` when no character survives decoding.
    pub fn decode(&self, probs: &[f32], steps: usize, classes: usize) -> Option<(String, f32)> {
        let mut text = String::new();
        let mut confidences = Vec::new();
        let mut previous = None;

        for step in probs.chunks_exact(classes).take(steps) {
            let (index, prob) = step
                .iter()
                .copied()
                .enumerate()
                .fold((BLANK_INDEX, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });

            let repeated = previous == Some(index);
            previous = Some(index);
            if index == BLANK_INDEX || repeated {
                continue;
            }

            if let Some(&ch) = self.characters.get(index - 1) {
                text.push(ch);
                confidences.push(prob);
            }
        }

        if confidences.is_empty() {
            return None;
        }

        let mean = confidences.iter().sum::<f32>() / confidences.len() as f32;
        Some((text, mean))
    }
}

/// Text recognizer backed by an ONNX model
pub struct OnnxTextRecognizer {
    session: OnnxSession,
    decoder: CtcDecoder,
    config: RecognizerConfig,
}

impl OnnxTextRecognizer {
    /// Load the recognition model and its character dictionary
    pub fn new(model_path: &Path, dictionary_path: &Path, config: RecognizerConfig) -> Result<Self> {
        let decoder = CtcDecoder::from_dictionary_file(dictionary_path, config.use_space_char)?;
        let session = OnnxSession::new(model_path, config.intra_threads)?;
        debug!("Recognizer dictionary has {} classes", decoder.num_classes());

        Ok(Self {
            session,
            decoder,
            config,
        })
    }
}

impl TextRecognizer for OnnxTextRecognizer {
    fn recognize(&self, region: &GrayImage) -> Result<Vec<OcrCandidate>> {
        if region.width() == 0 || region.height() == 0 {
            return Ok(vec![]);
        }

        let tensor = gray_to_recognition_tensor(region, self.config.input_height, self.config.max_width);

        let decoded = self.session.run(&tensor, |shape, data| {
            let &[1, steps, classes] = shape else {
                return Err(ModelError::UnexpectedShape {
                    output: "recognizer".to_string(),
                    shape: shape.to_vec(),
                }
                .into());
            };
            if steps <= 0 || classes <= 0 {
                return Ok(None);
            }
            Ok(self.decoder.decode(data, steps as usize, classes as usize))
        })?;

        Ok(decoded
            .map(|(text, confidence)| OcrCandidate::new(text, confidence))
            .into_iter()
            .collect())
    }
}
