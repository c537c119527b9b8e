//! Model management for ONNX Runtime
//!
//! Resolves the plate detector, text recognizer and character dictionary
//! files, reports their availability and loads ONNX sessions.

use anyhow::{Context, Result};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ModelsConfig;

/// Model identifier for the recognition pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// License plate detector (YOLO)
    PlateDetector,
    /// Text line recognizer (CRNN)
    TextRecognizer,
    /// Character dictionary for the recognizer
    Dictionary,
}

impl ModelType {
    pub const ALL: [ModelType; 3] = [
        ModelType::PlateDetector,
        ModelType::TextRecognizer,
        ModelType::Dictionary,
    ];

    /// Display name for status reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::PlateDetector => "Plate Detector",
            ModelType::TextRecognizer => "Text Recognizer",
            ModelType::Dictionary => "Character Dictionary",
        }
    }
}

/// Errors raised while loading or running a model
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{name} not found at {path}")]
    Missing { name: &'static str, path: PathBuf },

    #[error("model output '{output}' has unexpected shape {shape:?}")]
    UnexpectedShape { output: String, shape: Vec<i64> },

    #[error("model has no outputs")]
    NoOutputs,
}

/// Locates model files on disk
pub struct ModelManager {
    models_dir: PathBuf,
    detector_file: String,
    recognizer_file: String,
    dictionary_file: String,
}

impl ModelManager {
    /// Create a model manager rooted at `models_dir`
    pub fn new(models_dir: PathBuf, config: &ModelsConfig) -> Self {
        Self {
            models_dir,
            detector_file: config.detector_file.clone(),
            recognizer_file: config.recognizer_file.clone(),
            dictionary_file: config.dictionary_file.clone(),
        }
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        let filename = match model_type {
            ModelType::PlateDetector => &self.detector_file,
            ModelType::TextRecognizer => &self.recognizer_file,
            ModelType::Dictionary => &self.dictionary_file,
        };
        self.models_dir.join(filename)
    }

    /// Check if a model file is present and non-empty
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        std::fs::metadata(self.model_path(model_type))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Check if every model needed for recognition is present
    pub fn are_models_ready(&self) -> bool {
        ModelType::ALL.iter().all(|&m| self.is_model_available(m))
    }

    /// Get status of all models
    pub fn get_model_status(&self) -> Vec<(ModelType, bool, Option<u64>)> {
        ModelType::ALL
            .iter()
            .map(|&model_type| {
                let path = self.model_path(model_type);
                let available = self.is_model_available(model_type);
                let size = std::fs::metadata(&path).ok().map(|m| m.len());
                (model_type, available, size)
            })
            .collect()
    }

    /// Return the path to a model, failing if it is missing
    pub fn require(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);
        if !self.is_model_available(model_type) {
            return Err(ModelError::Missing {
                name: model_type.display_name(),
                path,
            }
            .into());
        }
        debug!("{} available at {:?}", model_type.display_name(), path);
        Ok(path)
    }
}

/// ONNX Runtime session wrapper
///
/// `Session::run` needs exclusive access, so the session sits behind a mutex
/// and callers can share the wrapper by reference.
pub struct OnnxSession {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model {:?}", model_path))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("ONNX model has no inputs")?;

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or(ModelError::NoOutputs)?;

        info!("Model loaded. Input: {}, Output: {}", input_name, output_name);

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }

    /// Run the model on a single NCHW tensor and hand the first output
    /// (shape, data) to `process`
    pub fn run<T>(
        &self,
        input: &Array4<f32>,
        process: impl FnOnce(&[i64], &[f32]) -> Result<T>,
    ) -> Result<T> {
        let tensor = TensorRef::from_array_view(input.view())
            .context("Failed to convert input tensor")?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .context("ONNX Runtime inference failed")?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .with_context(|| format!("Failed to extract output '{}' as f32", self.output_name))?;

        let dims: Vec<i64> = shape.iter().copied().collect();
        process(&dims, data)
    }
}
