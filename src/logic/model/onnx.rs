//! ONNX Runtime classifier backend
//!
//! One `OnnxClassifier` owns one session; the worker
//! pool builds K of them so K inferences can run side by side.

use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::classifier::{looks_like_probabilities, ClassScores, Classifier};
use crate::error::{GestureError, GestureResult};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Model metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_path: String,
    pub features: usize,
    pub labels: Vec<String>,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

/// Min-max ranges seen at training time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub min_vals: Vec<f32>,
    pub max_vals: Vec<f32>,
}

impl NormalizationParams {
    pub fn identity(features: usize) -> Self {
        Self {
            min_vals: vec![0.0; features],
            max_vals: vec![1.0; features],
        }
    }

    /// Min-max scale into [0, 1]
    pub fn apply(&self, features: &[f32]) -> Vec<f32> {
        features
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let min_val = self.min_vals.get(i).copied().unwrap_or(0.0);
                let max_val = self.max_vals.get(i).copied().unwrap_or(1.0);
                let range = (max_val - min_val).max(1e-8);
                ((v - min_val) / range).clamp(0.0, 1.0)
            })
            .collect()
    }
}

/// Sidecar file next to the model: `<model>.labels.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSidecar {
    pub labels: Vec<String>,
    #[serde(default)]
    pub normalization: Option<NormalizationParams>,
}

impl ModelSidecar {
    pub fn path_for(model_path: &Path) -> PathBuf {
        model_path.with_extension("labels.json")
    }

    pub fn load(path: &Path) -> GestureResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let sidecar: ModelSidecar = serde_json::from_str(&content)?;
        if sidecar.labels.is_empty() {
            return Err(GestureError::config(format!("no labels in {:?}", path)));
        }
        Ok(sidecar)
    }
}

// ============================================================================
// ONNX CLASSIFIER
// ============================================================================

pub struct OnnxClassifier {
    session: Mutex<Session>,
    metadata: ModelMetadata,
    normalization: Option<NormalizationParams>,
}

impl OnnxClassifier {
    /// Model at `model_path`, labels from its sidecar
    pub fn load(model_path: &Path, features: usize) -> GestureResult<Self> {
        let sidecar = ModelSidecar::load(&ModelSidecar::path_for(model_path))?;
        Self::load_with(model_path, features, sidecar)
    }

    pub fn load_with(model_path: &Path, features: usize, sidecar: ModelSidecar) -> GestureResult<Self> {
        log::info!("Loading ONNX model from: {:?}", model_path);

        if !model_path.exists() {
            return Err(GestureError::config(format!("Model not found: {:?}", model_path)));
        }

        let session = Session::builder()
            .map_err(|e| GestureError::inference(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| GestureError::inference(format!("Failed to set optimization: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| GestureError::inference(format!("Failed to load model: {}", e)))?;

        log::info!("ONNX model loaded ({} labels)", sidecar.labels.len());

        Ok(Self {
            session: Mutex::new(session),
            metadata: ModelMetadata {
                model_path: model_path.to_string_lossy().to_string(),
                features,
                labels: sidecar.labels,
                loaded_at: chrono::Utc::now(),
            },
            normalization: sidecar.normalization,
        })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn run(&self, features: &[f32]) -> GestureResult<Vec<f32>> {
        let input = match &self.normalization {
            Some(norm) => norm.apply(features),
            None => features.to_vec(),
        };

        let input_array = Array2::<f32>::from_shape_vec((1, input.len()), input)
            .map_err(|e| GestureError::inference(format!("Array error: {}", e)))?;
        let input_tensor = Value::from_array(input_array)
            .map_err(|e| GestureError::inference(format!("Tensor error: {}", e)))?;

        let mut session = self.session.lock();

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| GestureError::inference("No output defined"))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| GestureError::inference(format!("Inference failed: {}", e)))?;

        let output = outputs
            .get(&output_name)
            .ok_or_else(|| GestureError::inference("No output"))?;

        let output_tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| GestureError::inference(format!("Extract error: {}", e)))?;

        Ok(output_tensor.1.to_vec())
    }
}

impl Classifier for OnnxClassifier {
    fn name(&self) -> &str {
        "onnx"
    }

    fn classify(&self, features: &[f32]) -> GestureResult<ClassScores> {
        if features.len() != self.metadata.features {
            return Err(GestureError::inference(format!(
                "model expects {} features, got {}",
                self.metadata.features,
                features.len()
            )));
        }

        let raw = self.run(features)?;
        // Models exported without a softmax head give logits
        if looks_like_probabilities(&raw) {
            ClassScores::from_probabilities(&self.metadata.labels, &raw)
        } else {
            ClassScores::from_logits(&self.metadata.labels, &raw)
        }
    }
}
