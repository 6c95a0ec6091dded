//! Cycle results - what one prediction cycle hands back to the caller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{COMBINED_LABEL_SEPARATOR, UNKNOWN_LABEL};
use crate::logic::smoothing::SmoothingDecision;
use crate::logic::stream::{PredictionSample, StreamId};

/// Per-stream outcome of one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamVerdict {
    pub stream: StreamId,
    /// Classifier output before smoothing
    pub raw: Option<PredictionSample>,
    /// Smoothing path taken, absent when inference failed
    pub decision: Option<SmoothingDecision>,
    /// Threshold applied to the smoothed label
    pub threshold: Option<f32>,
    pub accepted: bool,
    pub cached: bool,
    pub error: Option<String>,
}

impl StreamVerdict {
    pub fn failed(stream: StreamId, error: impl Into<String>) -> Self {
        Self {
            stream,
            raw: None,
            decision: None,
            threshold: None,
            accepted: false,
            cached: false,
            error: Some(error.into()),
        }
    }

    /// Smoothed sample, whether or not it cleared its threshold
    pub fn smoothed(&self) -> Option<&PredictionSample> {
        self.decision.as_ref().and_then(|d| d.sample())
    }

    /// Accepted sample only
    pub fn accepted_sample(&self) -> Option<&PredictionSample> {
        if self.accepted {
            self.smoothed()
        } else {
            None
        }
    }

    /// Label to display for this stream
    pub fn label(&self) -> &str {
        self.accepted_sample()
            .map(|s| s.label.as_str())
            .unwrap_or(UNKNOWN_LABEL)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleResult {
    pub cycle_id: u64,
    pub timestamp: DateTime<Utc>,
    /// Sorted by stream
    pub verdicts: Vec<StreamVerdict>,
    pub combined_label: String,
    pub latency_us: u64,
}

impl CycleResult {
    pub fn empty(cycle_id: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            timestamp,
            verdicts: Vec::new(),
            combined_label: UNKNOWN_LABEL.to_string(),
            latency_us: 0,
        }
    }

    pub fn verdict(&self, stream: &StreamId) -> Option<&StreamVerdict> {
        self.verdicts.iter().find(|v| &v.stream == stream)
    }

    /// Accepted samples in slot order
    pub fn accepted(&self) -> impl Iterator<Item = &PredictionSample> {
        self.verdicts.iter().filter_map(|v| v.accepted_sample())
    }

    pub fn is_unknown(&self) -> bool {
        self.combined_label == UNKNOWN_LABEL
    }
}

/// Single label for the whole cycle.
///
/// Every stream accepted: labels joined in slot order. Otherwise the most
/// confident accepted label, or `unknown` when nothing was accepted.
pub fn combine_labels(verdicts: &[StreamVerdict]) -> String {
    let mut accepted: Vec<&PredictionSample> = verdicts.iter().filter_map(|v| v.accepted_sample()).collect();
    if accepted.is_empty() {
        return UNKNOWN_LABEL.to_string();
    }

    if accepted.len() > 1 && accepted.len() == verdicts.len() {
        accepted.sort_by_key(|s| s.stream);
        return accepted
            .iter()
            .map(|s| s.label.as_str())
            .collect::<Vec<_>>()
            .join(COMBINED_LABEL_SEPARATOR);
    }

    accepted
        .into_iter()
        .max_by(|a, b| {
            a.confidence
                .total_cmp(&b.confidence)
                .then_with(|| b.stream.cmp(&a.stream))
        })
        .map(|s| s.label.clone())
        .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
}
