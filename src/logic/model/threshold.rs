//! Threshold Calibration
//!
//! Per-label acceptance thresholds derived from offline precision/recall.
//! Low precision raises the bar (false triggers are the costly mistake),
//! low recall lowers it slightly so hard classes are not starved.
//!
//! The active table is swapped as a whole behind an `RwLock<Arc<_>>`;
//! a failed calibration never touches the current table.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::constants::{
    DEFAULT_LABEL_THRESHOLD, DEFAULT_METRICS_PARTITION, MAX_CALIBRATED_THRESHOLD,
    MIN_CALIBRATED_THRESHOLD,
};
use crate::error::{GestureError, GestureResult};

// ============================================================================
// FORMULA
// ============================================================================

/// Calibration formula parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Threshold of a perfect classifier
    pub base_threshold: f32,
    /// Weight of (1 - precision)
    pub precision_weight: f32,
    /// Weight of (1 - recall), subtracted
    pub recall_weight: f32,
    /// Minimum threshold (floor)
    pub min_threshold: f32,
    /// Maximum threshold (ceiling)
    pub max_threshold: f32,
    /// Lookup result for labels missing from the table
    pub default_threshold: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            base_threshold: 0.5,
            precision_weight: 0.7,
            recall_weight: 0.3,
            min_threshold: MIN_CALIBRATED_THRESHOLD,
            max_threshold: MAX_CALIBRATED_THRESHOLD,
            default_threshold: DEFAULT_LABEL_THRESHOLD,
        }
    }
}

impl ThresholdConfig {
    /// Every field finite and in [0, 1], floor not above ceiling
    pub fn validate(&self) -> GestureResult<()> {
        let fields = [
            ("base_threshold", self.base_threshold),
            ("precision_weight", self.precision_weight),
            ("recall_weight", self.recall_weight),
            ("min_threshold", self.min_threshold),
            ("max_threshold", self.max_threshold),
            ("default_threshold", self.default_threshold),
        ];
        for (field, value) in fields {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(GestureError::config(format!(
                    "threshold {} = {} is outside [0, 1]",
                    field, value
                )));
            }
        }
        if self.min_threshold > self.max_threshold {
            return Err(GestureError::config(format!(
                "min_threshold {} is above max_threshold {}",
                self.min_threshold, self.max_threshold
            )));
        }
        Ok(())
    }

    /// Never panics; callers validate the config first
    pub fn threshold_for(&self, precision: f32, recall: f32) -> f32 {
        let raw = self.base_threshold + (1.0 - precision) * self.precision_weight
            - (1.0 - recall) * self.recall_weight;
        raw.max(self.min_threshold).min(self.max_threshold)
    }
}

// ============================================================================
// METRICS DOCUMENT
// ============================================================================

/// Offline metrics for one label. `f1` is carried for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelMetrics {
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
}

impl LabelMetrics {
    fn validate(&self, partition: &str, label: &str) -> GestureResult<()> {
        for (field, value) in [("precision", self.precision), ("recall", self.recall), ("f1", self.f1)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(GestureError::calibration(format!(
                    "{}/{}: {} = {} is outside [0, 1]",
                    partition, label, field, value
                )));
            }
        }
        Ok(())
    }
}

/// `{ partition: { label: {precision, recall, f1} } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsDocument {
    pub partitions: BTreeMap<String, BTreeMap<String, LabelMetrics>>,
}

impl MetricsDocument {
    pub fn from_json(content: &str) -> GestureResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| GestureError::calibration(format!("malformed metrics document: {}", e)))
    }

    pub fn load(path: &Path) -> GestureResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GestureError::calibration(format!("cannot read metrics document {:?}: {}", path, e))
        })?;
        Self::from_json(&content)
    }

    /// Requested partition, else the first one by name
    pub fn partition(&self, name: &str) -> GestureResult<(&str, &BTreeMap<String, LabelMetrics>)> {
        if let Some((key, labels)) = self.partitions.get_key_value(name) {
            return Ok((key.as_str(), labels));
        }
        let (key, labels) = self
            .partitions
            .iter()
            .next()
            .ok_or_else(|| GestureError::calibration("metrics document has no partitions"))?;
        log::warn!("Metrics partition '{}' missing, using '{}'", name, key);
        Ok((key.as_str(), labels))
    }
}

// ============================================================================
// THRESHOLD TABLE
// ============================================================================

/// Immutable label → threshold mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    pub thresholds: BTreeMap<String, f32>,
    pub default_threshold: f32,
    pub partition: Option<String>,
    pub calibrated_at: Option<DateTime<Utc>>,
}

impl ThresholdTable {
    /// No calibrated labels: every lookup returns the default
    pub fn uncalibrated(default_threshold: f32) -> Self {
        Self {
            thresholds: BTreeMap::new(),
            default_threshold,
            partition: None,
            calibrated_at: None,
        }
    }

    pub fn lookup(&self, label: &str) -> f32 {
        self.thresholds
            .get(label)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}

// ============================================================================
// CALIBRATOR
// ============================================================================

pub struct ThresholdCalibrator {
    config: ThresholdConfig,
    partition: String,
    table: RwLock<Arc<ThresholdTable>>,
}

impl ThresholdCalibrator {
    pub fn new(config: ThresholdConfig, partition: impl Into<String>) -> Self {
        Self {
            table: RwLock::new(Arc::new(ThresholdTable::uncalibrated(config.default_threshold))),
            config,
            partition: partition.into(),
        }
    }

    /// Build a table without installing it
    pub fn build_table(&self, doc: &MetricsDocument) -> GestureResult<ThresholdTable> {
        self.config.validate()?;
        let (partition, labels) = doc.partition(&self.partition)?;
        if labels.is_empty() {
            return Err(GestureError::calibration(format!(
                "partition '{}' has no labels",
                partition
            )));
        }

        let mut thresholds = BTreeMap::new();
        for (label, metrics) in labels {
            metrics.validate(partition, label)?;
            let threshold = self.config.threshold_for(metrics.precision, metrics.recall);
            log::debug!(
                "Calibrated '{}': p={:.3} r={:.3} f1={:.3} -> {:.3}",
                label, metrics.precision, metrics.recall, metrics.f1, threshold
            );
            thresholds.insert(label.clone(), threshold);
        }

        Ok(ThresholdTable {
            thresholds,
            default_threshold: self.config.default_threshold,
            partition: Some(partition.to_string()),
            calibrated_at: Some(Utc::now()),
        })
    }

    /// Build and atomically install a new table
    pub fn calibrate(&self, doc: &MetricsDocument) -> GestureResult<Arc<ThresholdTable>> {
        let table = Arc::new(self.build_table(doc)?);
        *self.table.write() = Arc::clone(&table);
        log::info!(
            "Thresholds calibrated from '{}' ({} labels)",
            table.partition.as_deref().unwrap_or("?"),
            table.len()
        );
        Ok(table)
    }

    pub fn calibrate_json(&self, content: &str) -> GestureResult<Arc<ThresholdTable>> {
        let doc = MetricsDocument::from_json(content)?;
        self.calibrate(&doc)
    }

    pub fn load_file(&self, path: &Path) -> GestureResult<Arc<ThresholdTable>> {
        let doc = MetricsDocument::load(path)?;
        self.calibrate(&doc)
    }

    /// Current table; holders keep a consistent view across swaps
    pub fn table(&self) -> Arc<ThresholdTable> {
        self.table.read().clone()
    }

    pub fn lookup(&self, label: &str) -> f32 {
        self.table.read().lookup(label)
    }

    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }
}

impl Default for ThresholdCalibrator {
    fn default() -> Self {
        Self::new(ThresholdConfig::default(), DEFAULT_METRICS_PARTITION)
    }
}

// ============================================================================
// TESTS
// ============================================================================
