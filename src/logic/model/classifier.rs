//! Classifier contract and the rule-based fallback
//!
//! Any backend (ONNX, remote, rule-based) implements `Classifier`.
//! Implementations must be `Send + Sync`: pooled instances are moved across
//! worker threads, and the pool's shared fallback instance is called from
//! several threads at once.

use serde::{Deserialize, Serialize};

use crate::error::{GestureError, GestureResult};
use crate::logic::features::FeatureLayout;
use crate::logic::gesture::GestureType;

// ============================================================================
// CLASS SCORES
// ============================================================================

/// Label/confidence distribution returned by a classifier
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassScores {
    pub scores: Vec<(String, f32)>,
}

impl ClassScores {
    pub fn new(scores: Vec<(String, f32)>) -> Self {
        Self { scores }
    }

    /// Pair labels with probabilities; lengths must agree
    pub fn from_probabilities(labels: &[String], probs: &[f32]) -> GestureResult<Self> {
        if labels.len() != probs.len() {
            return Err(GestureError::inference(format!(
                "classifier produced {} scores for {} labels",
                probs.len(),
                labels.len()
            )));
        }
        Ok(Self {
            scores: labels.iter().cloned().zip(probs.iter().copied()).collect(),
        })
    }

    /// Same as `from_probabilities` after a softmax over raw logits
    pub fn from_logits(labels: &[String], logits: &[f32]) -> GestureResult<Self> {
        Self::from_probabilities(labels, &softmax(logits))
    }

    /// Highest score; equal scores resolve to the smaller label
    pub fn top(&self) -> Option<(&str, f32)> {
        self.scores
            .iter()
            .filter(|(_, s)| s.is_finite())
            .max_by(|(la, sa), (lb, sb)| sa.total_cmp(sb).then_with(|| lb.cmp(la)))
            .map(|(l, s)| (l.as_str(), s.clamp(0.0, 1.0)))
    }

    pub fn get(&self, label: &str) -> Option<f32> {
        self.scores.iter().find(|(l, _)| l == label).map(|(_, s)| *s)
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return vec![0.0; logits.len()];
    }
    exps.iter().map(|e| e / sum).collect()
}

/// True when the values already form a probability distribution
pub fn looks_like_probabilities(values: &[f32]) -> bool {
    let sum: f32 = values.iter().sum();
    values.iter().all(|v| (0.0..=1.0).contains(v)) && (sum - 1.0).abs() < 1e-3
}

// ============================================================================
// CLASSIFIER TRAIT
// ============================================================================

/// Black-box classifier over one feature vector
pub trait Classifier: Send + Sync {
    /// Backend name for logs and status
    fn name(&self) -> &str;

    fn classify(&self, features: &[f32]) -> GestureResult<ClassScores>;
}

// ============================================================================
// HEURISTIC FALLBACK
// ============================================================================

/// Finger states over the extension features
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FingerStates {
    thumb: bool,
    index: bool,
    middle: bool,
    ring: bool,
    pinky: bool,
}

/// Rule-based classifier over finger extension and fingertip distances.
/// Used when no model is loaded.
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    /// thumb, index, middle, ring, pinky
    extension_idx: [usize; 5],
    thumb_index_idx: usize,
    expected_len: usize,
    extension_threshold: f32,
    ok_distance: f32,
    pinch_distance: f32,
}

impl HeuristicClassifier {
    pub fn new(layout: &FeatureLayout) -> GestureResult<Self> {
        let index_of = |name: &str| {
            layout.index(name).ok_or_else(|| {
                GestureError::config(format!("heuristic classifier needs feature '{}'", name))
            })
        };

        Ok(Self {
            extension_idx: [
                index_of("thumb_extension")?,
                index_of("index_extension")?,
                index_of("middle_extension")?,
                index_of("ring_extension")?,
                index_of("pinky_extension")?,
            ],
            thumb_index_idx: index_of("thumb_index_distance")?,
            expected_len: layout.len(),
            extension_threshold: 0.5,
            ok_distance: 0.05,
            pinch_distance: 0.03,
        })
    }

    fn finger_states(&self, features: &[f32]) -> FingerStates {
        let ext = |i: usize| features[self.extension_idx[i]] > self.extension_threshold;
        FingerStates {
            thumb: ext(0),
            index: ext(1),
            middle: ext(2),
            ring: ext(3),
            pinky: ext(4),
        }
    }

    /// Mean distance of the extension values from the decision boundary, 0..1
    fn decisiveness(&self, features: &[f32]) -> f32 {
        let total: f32 = self
            .extension_idx
            .iter()
            .map(|&i| ((features[i] - self.extension_threshold).abs() * 2.0).min(1.0))
            .sum();
        total / self.extension_idx.len() as f32
    }

    fn match_pattern(&self, s: FingerStates, thumb_index: f32) -> (GestureType, f32) {
        let others_curled = !s.middle && !s.ring && !s.pinky;

        if s.index && others_curled {
            (GestureType::Point, 0.9)
        } else if s.thumb && s.index && s.middle && s.ring && s.pinky {
            (GestureType::OpenPalm, 0.9)
        } else if !s.thumb && !s.index && !s.middle && !s.ring && !s.pinky {
            (GestureType::Fist, 0.9)
        } else if s.thumb && !s.index && others_curled {
            (GestureType::ThumbsUp, 0.8)
        } else if s.index && s.middle && !s.ring && !s.pinky {
            (GestureType::Peace, 0.8)
        } else if s.middle && s.ring && s.pinky && thumb_index < self.ok_distance {
            (GestureType::OkSign, 0.8)
        } else if thumb_index < self.pinch_distance {
            (GestureType::Pinch, 0.8)
        } else {
            (GestureType::None, 0.0)
        }
    }
}

impl Classifier for HeuristicClassifier {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn classify(&self, features: &[f32]) -> GestureResult<ClassScores> {
        if features.len() != self.expected_len {
            return Err(GestureError::inference(format!(
                "heuristic classifier expects {} features, got {}",
                self.expected_len,
                features.len()
            )));
        }

        let states = self.finger_states(features);
        let (gesture, base) = self.match_pattern(states, features[self.thumb_index_idx]);
        if gesture == GestureType::None {
            // No rule matched: "none" with zero confidence, never a bypass
            return Ok(ClassScores::new(vec![(GestureType::None.as_str().to_string(), 0.0)]));
        }

        let confidence = base * (0.8 + 0.2 * self.decisiveness(features));
        Ok(ClassScores::new(vec![
            (gesture.as_str().to_string(), confidence),
            (GestureType::None.as_str().to_string(), 1.0 - confidence),
        ]))
    }
}

// ============================================================================
// TESTS
// ============================================================================
