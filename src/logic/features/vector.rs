//! Feature Vector - Core data structure for classifier input
//!
//! A fixed-length sequence of floats produced by the extraction side.
//! Optionally carries the hash of the layout it was built against so a
//! mismatched extractor is caught before inference.

use serde::{Deserialize, Serialize};

use super::layout::FeatureLayout;
use crate::error::{GestureError, GestureResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// CRC32 hash of the producing layout, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_hash: Option<u32>,
    pub values: Vec<f32>,
}

impl FeatureVector {
    /// Raw values with no layout tag
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            layout_hash: None,
            values,
        }
    }

    /// Values tagged with the layout they follow
    pub fn with_layout(layout: &FeatureLayout, values: Vec<f32>) -> Self {
        Self {
            layout_hash: Some(layout.hash()),
            values,
        }
    }

    /// Zeroed vector for a layout
    pub fn zeroed(layout: &FeatureLayout) -> Self {
        Self::with_layout(layout, vec![0.0; layout.len()])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.values.get(index).copied()
    }

    /// Get feature by name through the layout
    pub fn get_by_name(&self, layout: &FeatureLayout, name: &str) -> Option<f32> {
        layout.index(name).and_then(|i| self.get(i))
    }

    /// Set feature by name, returns false for unknown names
    pub fn set_by_name(&mut self, layout: &FeatureLayout, name: &str, value: f32) -> bool {
        match layout.index(name) {
            Some(i) if i < self.values.len() => {
                self.values[i] = value;
                true
            }
            _ => false,
        }
    }

    /// Check length, tag and value sanity against the active layout
    pub fn validate(&self, layout: &FeatureLayout) -> GestureResult<()> {
        if self.values.len() != layout.len() {
            return Err(GestureError::config(format!(
                "feature vector length {} does not match expected {}",
                self.values.len(),
                layout.len()
            )));
        }
        if let Some(hash) = self.layout_hash {
            if hash != layout.hash() {
                return Err(GestureError::config(format!(
                    "feature layout mismatch: expected hash {:08x}, got {:08x}",
                    layout.hash(),
                    hash
                )));
            }
        }
        if let Some(i) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(GestureError::config(format!(
                "feature {} is not finite",
                layout.name(i).unwrap_or("?")
            )));
        }
        Ok(())
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self::from_vec(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_length() {
        let layout = FeatureLayout::hand_default();
        assert!(FeatureVector::zeroed(&layout).validate(&layout).is_ok());

        let short = FeatureVector::from_vec(vec![0.0; 12]);
        let err = short.validate(&layout).unwrap_err();
        assert!(matches!(err, GestureError::Configuration(_)));
    }

    #[test]
    fn test_validate_layout_hash() {
        let layout = FeatureLayout::hand_default();
        let mut other = layout.clone();
        other.version += 1;

        let vector = FeatureVector::zeroed(&other);
        assert!(vector.validate(&layout).is_err());
    }

    #[test]
    fn test_reject_nan() {
        let layout = FeatureLayout::hand_default();
        let mut vector = FeatureVector::zeroed(&layout);
        vector.values[3] = f32::NAN;
        assert!(vector.validate(&layout).is_err());
    }

    #[test]
    fn test_get_set_by_name() {
        let layout = FeatureLayout::hand_default();
        let mut vector = FeatureVector::zeroed(&layout);
        assert!(vector.set_by_name(&layout, "index_extension", 0.9));
        assert!(!vector.set_by_name(&layout, "tail_length", 1.0));
        assert_eq!(vector.get_by_name(&layout, "index_extension"), Some(0.9));
        assert_eq!(vector.get(1), Some(0.9));
    }
}
