//! Cycle Event Types
//!
//! Flat, one-line-per-cycle view of a `CycleResult` for the JSONL log.
//! Enough to replay what the engine showed and why, without the full
//! vote details.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::cycle::{CycleResult, StreamVerdict};
use crate::logic::stream::StreamId;

// ============================================================================
// EVENT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A prediction cycle completed
    Cycle,
    /// Runtime configuration changed
    ConfigChanged,
    /// Threshold table replaced
    Calibrated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Cycle => "cycle",
            EventType::ConfigChanged => "config_changed",
            EventType::Calibrated => "calibrated",
        }
    }
}

/// One stream inside a cycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub stream: StreamId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    pub accepted: bool,
    #[serde(default)]
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&StreamVerdict> for StreamRecord {
    fn from(verdict: &StreamVerdict) -> Self {
        let smoothed = verdict.smoothed();
        Self {
            stream: verdict.stream,
            raw_label: verdict.raw.as_ref().map(|s| s.label.clone()),
            raw_confidence: verdict.raw.as_ref().map(|s| s.confidence),
            path: verdict.decision.as_ref().map(|d| d.path().to_string()),
            label: verdict.label().to_string(),
            confidence: smoothed.map(|s| s.confidence),
            threshold: verdict.threshold,
            accepted: verdict.accepted,
            cached: verdict.cached,
            error: verdict.error.clone(),
        }
    }
}

/// Immutable, timestamped engine event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleEvent {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub streams: Vec<StreamRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CycleEvent {
    pub fn cycle(result: &CycleResult) -> Self {
        Self {
            event_type: EventType::Cycle,
            timestamp: result.timestamp,
            cycle_id: Some(result.cycle_id),
            combined_label: Some(result.combined_label.clone()),
            latency_ms: Some(result.latency_us as f64 / 1000.0),
            streams: result.verdicts.iter().map(StreamRecord::from).collect(),
            detail: None,
        }
    }

    pub fn config_changed(detail: impl Into<String>) -> Self {
        Self::annotation(EventType::ConfigChanged, detail)
    }

    pub fn calibrated(detail: impl Into<String>) -> Self {
        Self::annotation(EventType::Calibrated, detail)
    }

    fn annotation(event_type: EventType, detail: impl Into<String>) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            cycle_id: None,
            combined_label: None,
            latency_ms: None,
            streams: Vec::new(),
            detail: Some(detail.into()),
        }
    }

    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::cycle::StreamVerdict;

    #[test]
    fn test_cycle_event_flattens_verdicts() {
        let mut result = CycleResult::empty(7, Utc::now());
        result.verdicts.push(StreamVerdict::failed(StreamId::left(), "model crashed"));
        result.latency_us = 1500;

        let event = CycleEvent::cycle(&result);
        assert_eq!(event.cycle_id, Some(7));
        assert_eq!(event.latency_ms, Some(1.5));
        assert_eq!(event.streams.len(), 1);
        assert_eq!(event.streams[0].label, "unknown");
        assert_eq!(event.streams[0].error.as_deref(), Some("model crashed"));

        let line = event.to_jsonl();
        assert!(!line.contains('\n'));
        let back: CycleEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_annotation_has_no_streams() {
        let event = CycleEvent::config_changed("time_window=0.3");
        assert_eq!(event.event_type.as_str(), "config_changed");
        assert!(!event.to_jsonl().contains("streams"));
    }
}
