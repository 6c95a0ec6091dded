//! Stream identity and prediction samples

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::MAX_STREAMS;
use crate::error::{GestureError, GestureResult};

/// Which hand a stream is tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handedness {
    Left,
    Right,
    Unassigned,
}

impl Handedness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Handedness::Left => "left",
            Handedness::Right => "right",
            Handedness::Unassigned => "unassigned",
        }
    }
}

/// One observation channel. Ordered by slot first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    pub slot: u8,
    pub role: Handedness,
}

impl StreamId {
    pub fn new(slot: u8, role: Handedness) -> Self {
        Self { slot, role }
    }

    pub fn left() -> Self {
        Self::new(0, Handedness::Left)
    }

    pub fn right() -> Self {
        Self::new(1, Handedness::Right)
    }

    pub fn validate(&self) -> GestureResult<()> {
        if (self.slot as usize) >= MAX_STREAMS {
            return Err(GestureError::config(format!(
                "stream slot {} out of range (max {})",
                self.slot,
                MAX_STREAMS - 1
            )));
        }
        Ok(())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.role.as_str(), self.slot)
    }
}

/// Immutable labelled prediction for one stream at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSample {
    pub stream: StreamId,
    pub label: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

impl PredictionSample {
    pub fn new(stream: StreamId, label: impl Into<String>, confidence: f32, timestamp: DateTime<Utc>) -> Self {
        Self {
            stream,
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            timestamp,
        }
    }
}
