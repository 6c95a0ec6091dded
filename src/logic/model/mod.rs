//! Model Module - inference backends and acceptance thresholds
//!
//! - `classifier.rs` - Classifier trait, ClassScores, heuristic fallback
//! - `onnx.rs` - ONNX Runtime backend
//! - `pool.rs` - bounded worker pool over classifier instances
//! - `threshold.rs` - per-label thresholds calibrated from offline metrics

pub mod classifier;
pub mod onnx;
pub mod pool;
pub mod threshold;

// Re-export common types
pub use classifier::{ClassScores, Classifier, HeuristicClassifier};
pub use onnx::{ModelMetadata, ModelSidecar, NormalizationParams, OnnxClassifier};
pub use pool::{ClassifierFactory, PoolStats, WorkerHandle, WorkerPool};
pub use threshold::{LabelMetrics, MetricsDocument, ThresholdCalibrator, ThresholdConfig, ThresholdTable};
