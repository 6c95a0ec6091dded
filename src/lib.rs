//! Gesture Core - concurrent inference and temporal smoothing for hand
//! gesture labels.
//!
//! Feed up to two feature vectors per frame into a [`Predictor`]; get back a
//! [`CycleResult`] with one debounced, threshold-checked verdict per hand and
//! a combined label for display.

pub mod constants;
pub mod error;
pub mod logic;

pub use error::{GestureError, GestureResult};
pub use logic::config::{ConfigParam, SmoothingConfig};
pub use logic::cycle::{CycleResult, StreamVerdict};
pub use logic::features::{EvictionPolicy, FeatureLayout, FeatureVector};
pub use logic::gesture::GestureType;
pub use logic::model::{Classifier, ClassScores, HeuristicClassifier, MetricsDocument, OnnxClassifier};
pub use logic::predictor::{Predictor, PredictorBuilder};
pub use logic::stream::{Handedness, PredictionSample, StreamId};
